//! Implementation of the `cachet diff` command.
//!
//! Loads two rule-key logs and explains why a target's key changed between
//! them, following changed dependencies down to the leaf values.

use std::path::PathBuf;

use anyhow::{Context, Result};

use cachet_lib::rulekey::{DiffOptions, RuleKeyLog, diff};

use super::ProjectArgs;
use crate::output::print_info;

pub struct DiffArgs {
  pub left: PathBuf,
  pub right: PathBuf,
  pub target: String,
  pub show_causes: bool,
  pub check_paths: bool,
}

pub fn cmd_diff(project: &ProjectArgs, args: &DiffArgs) -> Result<()> {
  let left = RuleKeyLog::load(&args.left).with_context(|| format!("Failed to load {}", args.left.display()))?;
  let right = RuleKeyLog::load(&args.right).with_context(|| format!("Failed to load {}", args.right.display()))?;

  let options = DiffOptions {
    verbose: args.show_causes,
    check_paths: args.check_paths,
    project_root: Some(project.project_root()?),
  };
  let lines = diff(&args.target, &left, &right, &options)?;

  if lines.is_empty() {
    print_info(&format!("No differences found for {}", args.target));
  }
  for line in lines {
    println!("{}", line);
  }
  Ok(())
}
