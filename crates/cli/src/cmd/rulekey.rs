//! Implementation of the `cachet rulekey` command.

use anyhow::{Context, Result};

use super::{ProjectArgs, parse_targets};
use crate::output::print_json;

/// Print `<key> <target>` for each target, or a JSON array with `--json`.
///
/// With `build.rule_key_log` configured, the structure of every key is
/// written there for `cachet diff`.
pub fn cmd_rulekey(project: &ProjectArgs, targets: &[String], json: bool) -> Result<()> {
  let targets = parse_targets(targets)?;
  let ctx = project.open(project.load_config()?)?;

  let mut keys = Vec::with_capacity(targets.len());
  for target in &targets {
    let rule = ctx
      .resolver()
      .require_rule(target)
      .with_context(|| format!("Failed to resolve {}", target))?;
    let key = ctx
      .rule_key_factory()
      .build(&rule)
      .with_context(|| format!("Failed to compute rule key for {}", target))?;
    keys.push((target, key));
  }
  ctx.shutdown().context("Failed to flush rule key log")?;

  if json {
    let entries: Vec<_> = keys
      .iter()
      .map(|(target, key)| serde_json::json!({ "target": target.to_string(), "key": key.to_hex() }))
      .collect();
    print_json(&entries)?;
  } else {
    for (target, key) in keys {
      println!("{} {}", key, target);
    }
  }
  Ok(())
}
