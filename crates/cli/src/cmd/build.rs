//! Implementation of the `cachet build` command.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use cachet_lib::engine::{BuildResult, TargetOutcome};

use super::{ProjectArgs, parse_targets};
use crate::output::{format_duration, print_error, print_json, print_stat, print_success, print_warning, truncate_hash};

pub struct BuildArgs {
  pub targets: Vec<String>,
  pub fail_fast: bool,
  pub threads: Option<usize>,
  pub json: bool,
}

/// Build the requested targets and report one line per target.
///
/// Returns the process exit code derived from the build result.
pub fn cmd_build(project: &ProjectArgs, args: &BuildArgs) -> Result<u8> {
  let targets = parse_targets(&args.targets)?;

  let mut config = project.load_config()?;
  if args.fail_fast {
    config.build.keep_going = false;
  }
  if let Some(threads) = args.threads {
    config.build.threads = Some(threads.max(1));
  }
  let ctx = project.open(config)?;

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt.block_on(async {
    let cancel = ctx.engine().cancel_handle();
    let ctrl_c = tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupted, cancelling build");
        cancel.cancel();
      }
    });
    let result = ctx.engine().build(&targets).await;
    ctrl_c.abort();
    result
  })?;
  let elapsed = started.elapsed();
  ctx.shutdown().context("Failed to flush rule key log")?;

  if args.json {
    print_json(&json_report(&result, elapsed.as_millis()))?;
  } else {
    print_report(&result);
    println!();
    print_stat("Built", &result.count("built").to_string());
    print_stat("Cached", &result.count("cached").to_string());
    print_stat("Failed", &result.count("failed").to_string());
    print_stat("Skipped", &result.count("skipped").to_string());
    if result.count("cancelled") > 0 {
      print_stat("Cancelled", &result.count("cancelled").to_string());
    }
    print_stat("Time", &format_duration(elapsed));
  }

  Ok(u8::try_from(result.exit_code()).unwrap_or(1))
}

fn print_report(result: &BuildResult) {
  for (target, outcome) in &result.outcomes {
    match outcome {
      TargetOutcome::Built { key, .. } => {
        print_success(&format!("{} built ({})", target, truncate_hash(&key.to_hex())));
      }
      TargetOutcome::Cached { key, source, .. } => {
        print_success(&format!(
          "{} cached from {} ({})",
          target,
          source,
          truncate_hash(&key.to_hex())
        ));
      }
      TargetOutcome::Failed { error, .. } => {
        print_error(&format!("{} failed [{}]: {}", target, error.class(), error));
      }
      TargetOutcome::Skipped { dependency } => {
        print_warning(&format!("{} skipped: dependency {} did not build", target, dependency));
      }
      TargetOutcome::Cancelled => print_warning(&format!("{} cancelled", target)),
    }
  }
}

fn json_report(result: &BuildResult, duration_ms: u128) -> serde_json::Value {
  let targets: Vec<_> = result
    .outcomes
    .iter()
    .map(|(target, outcome)| {
      let mut entry = serde_json::json!({
        "target": target.to_string(),
        "status": outcome.label(),
        "key": outcome.key().map(|k| k.to_hex()),
        "output": outcome.output().map(|p| p.display().to_string()),
      });
      match outcome {
        TargetOutcome::Cached { source, .. } => entry["source"] = serde_json::json!(source),
        TargetOutcome::Failed { error, .. } => {
          entry["error"] = serde_json::json!(error.to_string());
          entry["class"] = serde_json::json!(error.class().to_string());
        }
        TargetOutcome::Skipped { dependency } => entry["dependency"] = serde_json::json!(dependency.to_string()),
        _ => {}
      }
      entry
    })
    .collect();
  serde_json::json!({
    "requested": result.requested.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
    "exit_code": result.exit_code(),
    "duration_ms": duration_ms,
    "targets": targets,
  })
}
