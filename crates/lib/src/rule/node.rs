use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ArgValue, OptionSet, SourcePath, Step};
use crate::target::BuildTarget;
use crate::tool::ToolRef;

/// A target as declared in the build graph, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetNode {
  pub target: BuildTarget,
  pub rule_type: String,
  #[serde(default)]
  pub deps: Vec<BuildTarget>,
  #[serde(default)]
  pub extra_deps: Vec<BuildTarget>,
  #[serde(default)]
  pub srcs: Vec<SourcePath>,
  #[serde(default)]
  pub args: BTreeMap<String, ArgValue>,
  #[serde(default)]
  pub tool: Option<ToolRef>,
  #[serde(default)]
  pub options: BTreeMap<String, OptionSet>,
  #[serde(default)]
  pub steps: Vec<Step>,
}

impl TargetNode {
  pub fn new(target: BuildTarget, rule_type: impl Into<String>) -> Self {
    Self {
      target,
      rule_type: rule_type.into(),
      deps: Vec::new(),
      extra_deps: Vec::new(),
      srcs: Vec::new(),
      args: BTreeMap::new(),
      tool: None,
      options: BTreeMap::new(),
      steps: Vec::new(),
    }
  }

  pub fn with_dep(mut self, dep: BuildTarget) -> Self {
    self.deps.push(dep);
    self
  }

  pub fn with_src(mut self, src: SourcePath) -> Self {
    self.srcs.push(src);
    self
  }

  pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
    self.args.insert(name.into(), value);
    self
  }

  pub fn with_tool(mut self, tool: ToolRef) -> Self {
    self.tool = Some(tool);
    self
  }

  pub fn with_option(mut self, name: impl Into<String>, options: OptionSet) -> Self {
    self.options.insert(name.into(), options);
    self
  }

  pub fn with_step(mut self, step: Step) -> Self {
    self.steps.push(step);
    self
  }

  /// Every target this node depends on, declared deps first, without duplicates.
  ///
  /// Targets referenced from `srcs` count as dependencies.
  pub fn all_deps(&self) -> Vec<BuildTarget> {
    let mut seen = std::collections::HashSet::new();
    self
      .deps
      .iter()
      .chain(&self.extra_deps)
      .chain(self.srcs.iter().filter_map(SourcePath::build_target))
      .filter(|t| seen.insert(*t))
      .cloned()
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn t(s: &str) -> BuildTarget {
    BuildTarget::parse(s, None).unwrap()
  }

  #[test]
  fn source_targets_are_dependencies() {
    let node = TargetNode::new(t("//:app"), "genrule")
      .with_dep(t("//:lib"))
      .with_src(SourcePath::parse("//:gen").unwrap())
      .with_src(SourcePath::parse("//:lib").unwrap())
      .with_src(SourcePath::relative("main.c"));
    assert_eq!(node.all_deps(), vec![t("//:lib"), t("//:gen")]);
  }
}
