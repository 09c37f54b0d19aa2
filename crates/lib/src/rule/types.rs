use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ArgValue, OptionSet, SourcePath, Step};
use crate::target::BuildTarget;
use crate::tool::ResolvedTool;

/// Index of a rule in the resolver's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Everything needed to create a [`BuildRule`] except its arena slot.
#[derive(Debug, Clone)]
pub struct BuildRuleSpec {
  pub target: BuildTarget,
  pub rule_type: String,
  pub declared_deps: Vec<RuleId>,
  pub extra_deps: Vec<RuleId>,
  pub srcs: Vec<SourcePath>,
  pub args: BTreeMap<String, ArgValue>,
  pub tool: Option<ResolvedTool>,
  pub options: Vec<(String, Arc<OptionSet>)>,
  pub steps: Vec<Step>,
  /// Output directory relative to the project root.
  pub output_dir: PathBuf,
}

impl BuildRuleSpec {
  pub fn new(target: BuildTarget, rule_type: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
    Self {
      target,
      rule_type: rule_type.into(),
      declared_deps: Vec::new(),
      extra_deps: Vec::new(),
      srcs: Vec::new(),
      args: BTreeMap::new(),
      tool: None,
      options: Vec::new(),
      steps: Vec::new(),
      output_dir: output_dir.into(),
    }
  }
}

/// A concrete, immutable unit of build work.
#[derive(Debug)]
pub struct BuildRule {
  id: RuleId,
  spec: BuildRuleSpec,
}

impl BuildRule {
  pub(crate) fn new(id: RuleId, spec: BuildRuleSpec) -> Self {
    Self { id, spec }
  }

  pub fn id(&self) -> RuleId {
    self.id
  }

  pub fn target(&self) -> &BuildTarget {
    &self.spec.target
  }

  pub fn rule_type(&self) -> &str {
    &self.spec.rule_type
  }

  pub fn declared_deps(&self) -> &[RuleId] {
    &self.spec.declared_deps
  }

  /// Dependencies not named in `deps`, such as producers of source paths.
  pub fn extra_deps(&self) -> &[RuleId] {
    &self.spec.extra_deps
  }

  /// Declared then extra dependencies.
  pub fn deps(&self) -> impl Iterator<Item = RuleId> + '_ {
    self.spec.declared_deps.iter().chain(&self.spec.extra_deps).copied()
  }

  pub fn srcs(&self) -> &[SourcePath] {
    &self.spec.srcs
  }

  pub fn args(&self) -> &BTreeMap<String, ArgValue> {
    &self.spec.args
  }

  pub fn tool(&self) -> Option<&ResolvedTool> {
    self.spec.tool.as_ref()
  }

  pub fn options(&self) -> &[(String, Arc<OptionSet>)] {
    &self.spec.options
  }

  pub fn steps(&self) -> &[Step] {
    &self.spec.steps
  }

  pub fn output_dir(&self) -> &Path {
    &self.spec.output_dir
  }
}
