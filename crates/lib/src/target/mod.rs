//! Build target identity: `cell//base/path:name#flavor1,flavor2`.

mod intern;
mod parse;
mod types;

pub use intern::TargetInterner;
pub use types::{BuildTarget, Flavor, TargetParseError};
