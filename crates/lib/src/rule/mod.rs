//! Build rules and the declarative target graph they are created from.

mod arg;
mod graph;
mod node;
mod options;
mod source_path;
mod step;
mod types;

pub use arg::ArgValue;
pub use graph::{GraphLoadError, InMemoryTargetGraph, TargetGraph, TargetGraphFile};
pub use node::TargetNode;
pub use options::OptionSet;
pub use source_path::{SourcePath, SourcePathError};
pub use step::Step;
pub use types::{BuildRule, BuildRuleSpec, RuleId};
