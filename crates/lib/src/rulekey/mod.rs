//! Rule keys: the content fingerprint of a build rule's transitive inputs.

mod builder;
pub mod diff;
mod factory;
mod logger;
mod types;

pub use builder::{RuleKeyBuilder, RuleKeySource};
pub use diff::{DiffError, DiffOptions, diff};
pub use factory::RuleKeyFactory;
pub use logger::{
  JsonLinesLogSink, MemoryLogSink, RuleKeyEntry, RuleKeyLog, RuleKeyLogError, RuleKeyLogSink, RuleKeyLogger,
  RuleKeyRecord,
};
pub use types::{AppendsToRuleKey, InvalidRuleKey, MapOrder, Num, RuleKey, RuleKeyError, Value};
