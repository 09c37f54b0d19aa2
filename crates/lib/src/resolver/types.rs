use thiserror::Error;

use crate::target::BuildTarget;
use crate::tool::ToolResolutionError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  #[error("no target node for {target}{}", required_by_suffix(.required_by))]
  NoSuchTarget {
    target: BuildTarget,
    required_by: Option<BuildTarget>,
  },

  #[error("cycle detected in dependency graph: {}", format_chain(.chain))]
  CyclicDependency { chain: Vec<BuildTarget> },

  #[error("a build rule for {0} already exists")]
  DuplicateRule(BuildTarget),

  #[error("failed to resolve tool for {target}: {source}")]
  Tool {
    target: BuildTarget,
    #[source]
    source: ToolResolutionError,
  },

  #[error("{target} cannot be built because its dependency {dependency} failed to resolve")]
  DependencyFailed {
    target: BuildTarget,
    dependency: BuildTarget,
  },

  #[error("resolver invariant violated: {0}")]
  Internal(String),
}

fn format_chain(chain: &[BuildTarget]) -> String {
  chain
    .iter()
    .map(BuildTarget::to_string)
    .collect::<Vec<_>>()
    .join(" -> ")
}

fn required_by_suffix(required_by: &Option<BuildTarget>) -> String {
  match required_by {
    Some(target) => format!(" (required by {target})"),
    None => String::new(),
  }
}
