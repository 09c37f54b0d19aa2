mod build;
mod diff;
mod hash;
mod rulekey;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use cachet_lib::config::CachetConfig;
use cachet_lib::context::BuildContext;
use cachet_lib::rule::TargetGraphFile;
use cachet_lib::target::BuildTarget;

pub use build::{BuildArgs, cmd_build};
pub use diff::{DiffArgs, cmd_diff};
pub use hash::cmd_hash;
pub use rulekey::cmd_rulekey;

/// Flags shared by every subcommand.
pub struct ProjectArgs {
  pub root: PathBuf,
  pub graph: PathBuf,
}

impl ProjectArgs {
  pub fn project_root(&self) -> Result<PathBuf> {
    dunce::canonicalize(&self.root).with_context(|| format!("Project root not found: {}", self.root.display()))
  }

  pub fn load_config(&self) -> Result<CachetConfig> {
    let root = self.project_root()?;
    CachetConfig::load(&root).context("Failed to load configuration")
  }

  /// Load the target graph and wire a build session around it.
  pub fn open(&self, config: CachetConfig) -> Result<BuildContext> {
    let root = self.project_root()?;
    let graph_path = root.join(&self.graph);
    let graph = TargetGraphFile::load(&graph_path)
      .with_context(|| format!("Failed to load target graph: {}", graph_path.display()))?;
    BuildContext::new(root, config, Arc::new(graph)).context("Failed to set up build")
  }
}

pub fn parse_targets(targets: &[String]) -> Result<Vec<BuildTarget>> {
  targets
    .iter()
    .map(|t| BuildTarget::parse(t, None).with_context(|| format!("Invalid target: {}", t)))
    .collect()
}
