//! Wiring from a loaded configuration to a ready [`BuildEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{ArtifactCache, DirArtifactCache, MemoryArtifactCache, TieredArtifactCache};
use crate::config::CachetConfig;
use crate::engine::BuildEngine;
use crate::fs::{DiskFilesystem, ProjectFilesystem};
use crate::hasher::ContentHasher;
use crate::resolver::BuildRuleResolver;
use crate::rule::TargetGraph;
use crate::rulekey::{JsonLinesLogSink, RuleKeyFactory, RuleKeyLogError, RuleKeyLogSink};
use crate::tool::ConfiguredToolProvider;

#[derive(Debug, Error)]
pub enum ContextError {
  #[error(transparent)]
  RuleKeyLog(#[from] RuleKeyLogError),
}

/// One build session: the resolver, rule-key factory, cache tiers and engine
/// sharing a single project root.
pub struct BuildContext {
  project_root: PathBuf,
  config: CachetConfig,
  engine: BuildEngine,
  log_sink: Option<Arc<JsonLinesLogSink>>,
}

impl BuildContext {
  pub fn new(
    project_root: impl Into<PathBuf>,
    config: CachetConfig,
    graph: Arc<dyn TargetGraph>,
  ) -> Result<Self, ContextError> {
    let project_root = project_root.into();
    let fs: Arc<dyn ProjectFilesystem> = Arc::new(DiskFilesystem::new(&project_root));
    Self::from_parts(project_root, config, graph, fs, default_tiers)
  }

  /// Like [`BuildContext::new`] with a custom filesystem and cache tiers.
  pub fn from_parts(
    project_root: impl Into<PathBuf>,
    config: CachetConfig,
    graph: Arc<dyn TargetGraph>,
    fs: Arc<dyn ProjectFilesystem>,
    tiers: impl FnOnce(&CachetConfig) -> Vec<Arc<dyn ArtifactCache>>,
  ) -> Result<Self, ContextError> {
    let project_root = project_root.into();
    let tools = ConfiguredToolProvider::new(config.tools.clone()).with_filesystem(Arc::clone(&fs));
    let resolver = Arc::new(BuildRuleResolver::new(
      graph,
      Arc::new(tools),
      &config.build.output_dir,
    ));

    let mut factory = RuleKeyFactory::new(Arc::clone(&resolver), Arc::new(ContentHasher::new(fs)));
    let log_sink = match &config.build.rule_key_log {
      Some(path) => {
        let sink = Arc::new(JsonLinesLogSink::create(project_root.join(path))?);
        debug!(path = %sink.path().display(), "logging rule keys");
        let dyn_sink: Arc<dyn RuleKeyLogSink> = sink.clone();
        factory = factory.with_log_sink(dyn_sink);
        Some(sink)
      }
      None => None,
    };

    let cache = TieredArtifactCache::new(tiers(&config));
    info!(
      root = %project_root.display(),
      tiers = cache.tiers().len(),
      threads = config.threads(),
      "build context ready"
    );
    let engine = BuildEngine::new(
      resolver,
      Arc::new(factory),
      cache,
      &project_root,
      config.engine_config(),
    );

    Ok(Self {
      project_root,
      config,
      engine,
      log_sink,
    })
  }

  pub fn project_root(&self) -> &Path {
    &self.project_root
  }

  pub fn config(&self) -> &CachetConfig {
    &self.config
  }

  pub fn engine(&self) -> &BuildEngine {
    &self.engine
  }

  pub fn rule_key_factory(&self) -> &Arc<RuleKeyFactory> {
    self.engine.rule_key_factory()
  }

  pub fn resolver(&self) -> &Arc<BuildRuleResolver> {
    self.engine.resolver()
  }

  /// Flush the rule-key log, if one is open.
  pub fn shutdown(&self) -> Result<(), ContextError> {
    if let Some(sink) = &self.log_sink {
      sink.flush()?;
    }
    Ok(())
  }
}

/// An in-process tier in front of the local directory cache.
fn default_tiers(config: &CachetConfig) -> Vec<Arc<dyn ArtifactCache>> {
  let mode = config.cache.mode;
  if !mode.can_read() && !mode.can_write() {
    debug!("artifact cache disabled");
    return Vec::new();
  }
  vec![
    Arc::new(MemoryArtifactCache::new("memory", mode)),
    Arc::new(DirArtifactCache::new(config.cache_dir(), mode)),
  ]
}
