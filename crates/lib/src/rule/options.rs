use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rulekey::{AppendsToRuleKey, RuleKeyBuilder, RuleKeyError, Value};

/// A named group of tool options hashed as a nested sub-key.
///
/// Nested groups become nested sub-keys, so a changed define deep inside
/// still shows up as `opts.<group>.defines` in a rule-key diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSet {
  #[serde(default)]
  pub flags: Vec<String>,
  #[serde(default)]
  pub defines: BTreeMap<String, String>,
  #[serde(default)]
  pub nested: BTreeMap<String, OptionSet>,
}

impl AppendsToRuleKey for OptionSet {
  fn append_to_rule_key(&self, builder: &mut RuleKeyBuilder<'_>) -> Result<(), RuleKeyError> {
    builder
      .set("flags", Value::list(&self.flags))?
      .set("defines", self.defines.clone())?;
    for (name, group) in &self.nested {
      builder.set(name, Value::Appendable(Arc::new(group.clone())))?;
    }
    Ok(())
  }
}
