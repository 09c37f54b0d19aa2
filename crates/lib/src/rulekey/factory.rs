//! Computes and memoizes the rule key of every build rule.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::builder::{RuleKeyBuilder, RuleKeySource};
use super::logger::{RuleKeyLogSink, RuleKeyRecord};
use super::types::{MapOrder, RuleKey, RuleKeyError, Value};
use crate::hasher::ContentHasher;
use crate::resolver::BuildRuleResolver;
use crate::rule::{BuildRule, RuleId};
use crate::target::BuildTarget;

type Slot = Arc<Mutex<Option<RuleKey>>>;

/// Fields are always fed in this order.
///
/// `name`, `buck.type`, `flavors`, `buck.declaredDeps`, `buck.extraDeps`,
/// `srcs`, `tool`, `args`, one entry per option group, `steps`.
pub struct RuleKeyFactory {
  resolver: Arc<BuildRuleResolver>,
  content: Arc<ContentHasher>,
  memo: DashMap<RuleId, Slot>,
  sink: Option<Arc<dyn RuleKeyLogSink>>,
}

impl RuleKeyFactory {
  pub fn new(resolver: Arc<BuildRuleResolver>, content: Arc<ContentHasher>) -> Self {
    Self {
      resolver,
      content,
      memo: DashMap::new(),
      sink: None,
    }
  }

  /// Record every computed key with its structure.
  pub fn with_log_sink(mut self, sink: Arc<dyn RuleKeyLogSink>) -> Self {
    self.sink = Some(sink);
    self
  }

  pub fn content_hasher(&self) -> &Arc<ContentHasher> {
    &self.content
  }

  /// The rule key of `rule`, computing dependencies' keys first.
  pub fn build(&self, rule: &BuildRule) -> Result<RuleKey, RuleKeyError> {
    for id in self.resolver.dependency_closure(rule.id()) {
      self.key_for(id)?;
    }
    self.key_for(rule.id())
  }

  /// A previously computed key, without computing anything.
  pub fn cached(&self, id: RuleId) -> Option<RuleKey> {
    let slot = self.memo.get(&id).map(|slot| Arc::clone(slot.value()))?;
    let key = *slot.lock().unwrap_or_else(PoisonError::into_inner);
    key
  }

  /// Single-flight per rule: concurrent callers wait on the slot's lock and
  /// then read the stored key. Failures are not stored.
  fn key_for(&self, id: RuleId) -> Result<RuleKey, RuleKeyError> {
    let slot = Arc::clone(self.memo.entry(id).or_default().value());
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(key) = *guard {
      return Ok(key);
    }

    let rule = self.resolver.get(id).ok_or(RuleKeyError::UnknownRule(id))?;
    let record = self.compute(&rule)?;
    *guard = Some(record.key);
    drop(guard);

    debug!(rule = %rule.target(), key = %record.key, "computed rule key");
    trace!(
      target: "cachet::rulekey",
      rule = %record.target,
      key = %record.key,
      entries = ?record.entries,
      "rule key structure"
    );
    if let Some(sink) = &self.sink {
      sink.record(&record);
    }
    Ok(record.key)
  }

  fn compute(&self, rule: &BuildRule) -> Result<RuleKeyRecord, RuleKeyError> {
    let mut builder = RuleKeyBuilder::new(&self.content).with_rules(self);
    let target = rule.target();

    builder
      .set("name", target.unflavored().fully_qualified_name())?
      .set("buck.type", rule.rule_type())?
      .set("flavors", Value::list(target.flavors().iter().map(|f| f.as_str())))?
      .set("buck.declaredDeps", Value::list(rule.declared_deps().iter().copied()))?
      .set("buck.extraDeps", Value::list(rule.extra_deps().iter().copied()))?
      .set("srcs", Value::list(rule.srcs().iter().cloned()))?;

    if let Some(tool) = rule.tool() {
      builder.set("tool", Value::appendable(tool.clone()))?;
    }

    builder.set(
      "args",
      Value::Map(
        MapOrder::Sorted,
        rule
          .args()
          .iter()
          .map(|(k, v)| (Value::Str(k.clone()), Value::from(v)))
          .collect(),
      ),
    )?;

    for (name, options) in rule.options() {
      builder.set(name, Value::Appendable(options.clone()))?;
    }

    builder.set(
      "steps",
      Value::List(rule.steps().iter().cloned().map(Value::appendable).collect()),
    )?;

    let (key, entries) = builder.build_with_log();
    Ok(RuleKeyRecord {
      target: target.fully_qualified_name(),
      key,
      entries,
    })
  }
}

impl RuleKeySource for RuleKeyFactory {
  fn rule_key(&self, id: RuleId) -> Result<RuleKey, RuleKeyError> {
    self.key_for(id)
  }

  fn rule_for_target(&self, target: &BuildTarget) -> Option<RuleId> {
    self.resolver.lookup(target)
  }
}
