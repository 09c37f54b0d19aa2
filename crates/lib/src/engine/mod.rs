//! Rule execution.
//!
//! This module turns requested targets into outputs:
//! - resolves targets and gathers their dependency closure into a DAG
//! - schedules a rule as soon as all of its dependencies succeeded
//! - restores outputs from the artifact cache when the rule key is known
//! - runs steps and stores the packed output otherwise
//! - skips dependents of failed rules

mod dag;
mod step;
mod types;

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OnceCell, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::{Artifact, ArtifactCache, CacheHit, TieredArtifactCache, pack_output, unpack_artifact};
use crate::consts::SCRATCH_DIR;
use crate::resolver::BuildRuleResolver;
use crate::rule::{BuildRule, RuleId, SourcePath};
use crate::rulekey::{RuleKey, RuleKeyFactory};
use crate::target::BuildTarget;
use crate::util::hash::hash_directory;

pub use dag::RuleDag;
pub use step::{StepContext, execute_step};
pub use types::{BuildError, BuildResult, EngineConfig, EngineError, ErrorClass, StepError, TargetOutcome};

#[derive(Debug, Clone, Copy)]
enum RuleState {
  Pending,
  KeyComputed,
  CacheHit,
  CacheMiss,
  Building,
  Done,
  Failed,
}

impl RuleState {
  fn as_str(self) -> &'static str {
    match self {
      RuleState::Pending => "pending",
      RuleState::KeyComputed => "key_computed",
      RuleState::CacheHit => "cache_hit",
      RuleState::CacheMiss => "cache_miss",
      RuleState::Building => "building",
      RuleState::Done => "done",
      RuleState::Failed => "failed",
    }
  }
}

fn transition(target: &BuildTarget, state: RuleState) {
  debug!(rule = %target, state = state.as_str(), "rule state");
}

/// Shared by every caller waiting on the same rule key.
#[derive(Debug, Clone)]
enum RuleOutcome {
  Built,
  Cached(String),
  Failed(BuildError),
}

struct Finished {
  key: Option<RuleKey>,
  outcome: RuleOutcome,
}

struct Shared {
  resolver: Arc<BuildRuleResolver>,
  factory: Arc<RuleKeyFactory>,
  cache: Arc<TieredArtifactCache>,
  config: EngineConfig,
  project_root: PathBuf,
  workers: Arc<Semaphore>,
  inflight: DashMap<RuleKey, Arc<OnceCell<RuleOutcome>>>,
}

/// Stops an engine's running and future builds.
#[derive(Debug, Clone)]
pub struct CancelHandle {
  tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
  /// Abort outstanding work. Running commands are killed and affected
  /// targets report `Cancelled`.
  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }
}

pub struct BuildEngine {
  shared: Arc<Shared>,
  cancel: Arc<watch::Sender<bool>>,
}

impl BuildEngine {
  pub fn new(
    resolver: Arc<BuildRuleResolver>,
    factory: Arc<RuleKeyFactory>,
    cache: TieredArtifactCache,
    project_root: impl Into<PathBuf>,
    config: EngineConfig,
  ) -> Self {
    let (tx, _) = watch::channel(false);
    Self {
      shared: Arc::new(Shared {
        resolver,
        factory,
        cache: Arc::new(cache),
        workers: Arc::new(Semaphore::new(config.threads.max(1))),
        config,
        project_root: project_root.into(),
        inflight: DashMap::new(),
      }),
      cancel: Arc::new(tx),
    }
  }

  pub fn resolver(&self) -> &Arc<BuildRuleResolver> {
    &self.shared.resolver
  }

  pub fn rule_key_factory(&self) -> &Arc<RuleKeyFactory> {
    &self.shared.factory
  }

  pub fn config(&self) -> &EngineConfig {
    &self.shared.config
  }

  pub fn cancel_handle(&self) -> CancelHandle {
    CancelHandle {
      tx: Arc::clone(&self.cancel),
    }
  }

  /// Build `targets` and everything they depend on.
  ///
  /// Per-target failures are reported in the result; only problems with the
  /// request as a whole are returned as errors.
  pub async fn build(&self, targets: &[BuildTarget]) -> Result<BuildResult, EngineError> {
    if targets.is_empty() {
      return Err(EngineError::NoTargets);
    }
    info!(targets = targets.len(), "starting build");

    let mut result = BuildResult {
      requested: targets.to_vec(),
      ..Default::default()
    };
    let mut roots = Vec::new();
    for target in targets {
      match self.shared.resolver.require_rule(target) {
        Ok(rule) => roots.push(rule),
        Err(e) => {
          error!(rule = %target, error = %e, "failed to resolve target");
          result.outcomes.insert(
            target.clone(),
            TargetOutcome::Failed {
              key: None,
              error: e.into(),
            },
          );
        }
      }
    }

    let dag = RuleDag::from_roots(&self.shared.resolver, &roots)?;
    info!(rules = dag.len(), "computed build graph");
    self.schedule(&dag, &mut result).await;

    info!(
      built = result.count("built"),
      cached = result.count("cached"),
      failed = result.count("failed"),
      skipped = result.count("skipped"),
      cancelled = result.count("cancelled"),
      "build complete"
    );
    Ok(result)
  }

  async fn schedule(&self, dag: &RuleDag, result: &mut BuildResult) {
    let resolver = &self.shared.resolver;
    let mut cancel_rx = self.cancel.subscribe();
    let mut cancelled = *cancel_rx.borrow_and_update();
    let mut watching = true;
    let mut stopped = false;

    let mut waiting: HashMap<RuleId, usize> = dag.rules().map(|id| (id, dag.dependencies(id).len())).collect();
    let mut ready: VecDeque<RuleId> = dag
      .topological_order()
      .into_iter()
      .filter(|id| waiting.get(id) == Some(&0))
      .collect();
    let mut done: HashSet<RuleId> = HashSet::new();
    let mut running: HashMap<tokio::task::Id, RuleId> = HashMap::new();
    let mut tasks: JoinSet<Finished> = JoinSet::new();

    loop {
      if !stopped && !cancelled {
        while let Some(id) = ready.pop_front() {
          let Some(rule) = resolver.get(id) else {
            continue;
          };
          transition(rule.target(), RuleState::Pending);
          let shared = Arc::clone(&self.shared);
          let handle = tasks.spawn(run_rule(shared, rule));
          running.insert(handle.id(), id);
        }
      }
      if tasks.is_empty() {
        break;
      }

      tokio::select! {
        joined = tasks.join_next_with_id() => {
          let Some(joined) = joined else {
            break;
          };
          let (task_id, finished) = match joined {
            Ok((task_id, finished)) => (task_id, Ok(finished)),
            Err(e) => (e.id(), Err(e)),
          };
          let Some(id) = running.remove(&task_id) else {
            continue;
          };
          let Some(rule) = resolver.get(id) else {
            continue;
          };
          let target = rule.target();

          let outcome = match finished {
            Ok(finished) => self.target_outcome(&rule, finished),
            Err(e) if e.is_cancelled() => TargetOutcome::Cancelled,
            Err(e) => TargetOutcome::Failed {
              key: None,
              error: BuildError::Internal {
                target: target.clone(),
                message: panic_message(e.into_panic()),
              },
            },
          };
          done.insert(id);

          if outcome.is_success() {
            for dependent in dag.dependents(id) {
              if let Some(count) = waiting.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                  ready.push_back(dependent);
                }
              }
            }
          } else {
            if let TargetOutcome::Failed { error, .. } = &outcome {
              error!(rule = %target, class = %error.class(), error = %error, "build failed");
              if !self.shared.config.keep_going {
                stopped = true;
              }
            }
            skip_dependents(dag, resolver, id, target, &mut done, result);
          }
          result.outcomes.insert(target.clone(), outcome);
        }
        changed = cancel_rx.changed(), if watching && !cancelled => {
          if changed.is_err() {
            watching = false;
          } else if *cancel_rx.borrow_and_update() {
            warn!(running = tasks.len(), "build cancelled");
            cancelled = true;
            tasks.abort_all();
          }
        }
      }
    }

    for id in dag.topological_order() {
      if !done.contains(&id)
        && let Some(rule) = resolver.get(id)
      {
        result
          .outcomes
          .entry(rule.target().clone())
          .or_insert(TargetOutcome::Cancelled);
      }
    }
  }

  fn target_outcome(&self, rule: &BuildRule, finished: Finished) -> TargetOutcome {
    let output = self.shared.project_root.join(rule.output_dir());
    match (finished.key, finished.outcome) {
      (key, RuleOutcome::Failed(error)) => TargetOutcome::Failed { key, error },
      (Some(key), RuleOutcome::Built) => TargetOutcome::Built { key, output },
      (Some(key), RuleOutcome::Cached(source)) => TargetOutcome::Cached { key, output, source },
      (None, _) => TargetOutcome::Failed {
        key: None,
        error: BuildError::Internal {
          target: rule.target().clone(),
          message: "rule finished without a rule key".to_string(),
        },
      },
    }
  }
}

/// Mark everything downstream of `failed` as skipped.
fn skip_dependents(
  dag: &RuleDag,
  resolver: &BuildRuleResolver,
  failed: RuleId,
  failed_target: &BuildTarget,
  done: &mut HashSet<RuleId>,
  result: &mut BuildResult,
) {
  let mut queue: VecDeque<RuleId> = dag.dependents(failed).into();
  while let Some(id) = queue.pop_front() {
    if !done.insert(id) {
      continue;
    }
    let Some(rule) = resolver.get(id) else {
      continue;
    };
    warn!(rule = %rule.target(), failed_dep = %failed_target, "skipping rule due to failed dependency");
    result.outcomes.insert(
      rule.target().clone(),
      TargetOutcome::Skipped {
        dependency: failed_target.clone(),
      },
    );
    queue.extend(dag.dependents(id));
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  match payload.downcast::<String>() {
    Ok(message) => *message,
    Err(payload) => match payload.downcast::<&'static str>() {
      Ok(message) => (*message).to_string(),
      Err(_) => "unknown panic".to_string(),
    },
  }
}

/// Compute the key, then build or restore at most once per key.
async fn run_rule(shared: Arc<Shared>, rule: Arc<BuildRule>) -> Finished {
  let target = rule.target().clone();

  let computed = {
    let shared = Arc::clone(&shared);
    let rule = Arc::clone(&rule);
    tokio::task::spawn_blocking(move || {
      shared
        .factory
        .build(&rule)
        .map_err(|e| BuildError::rule_key(rule.target(), &e))
    })
    .await
  };
  let key = match computed {
    Ok(Ok(key)) => key,
    Ok(Err(error)) => {
      transition(&target, RuleState::Failed);
      return Finished {
        key: None,
        outcome: RuleOutcome::Failed(error),
      };
    }
    Err(e) => {
      return Finished {
        key: None,
        outcome: RuleOutcome::Failed(BuildError::Internal {
          target,
          message: format!("rule key computation failed: {e}"),
        }),
      };
    }
  };
  transition(&target, RuleState::KeyComputed);

  let cell = Arc::clone(shared.inflight.entry(key).or_default().value());
  let outcome = cell
    .get_or_init(|| build_with_key(Arc::clone(&shared), Arc::clone(&rule), key))
    .await
    .clone();
  shared.inflight.remove_if(&key, |_, existing| Arc::ptr_eq(existing, &cell));

  Finished {
    key: Some(key),
    outcome,
  }
}

async fn build_with_key(shared: Arc<Shared>, rule: Arc<BuildRule>, key: RuleKey) -> RuleOutcome {
  let target = rule.target();
  let out_dir = shared.project_root.join(rule.output_dir());

  match fetch(&shared, key).await {
    Some(CacheHit { artifact, source }) => {
      transition(target, RuleState::CacheHit);
      let dir = out_dir.clone();
      match tokio::task::spawn_blocking(move || unpack_artifact(&artifact, &dir)).await {
        Ok(Ok(())) => {
          info!(rule = %target, key = %key, cache = %source, "restored from cache");
          transition(target, RuleState::Done);
          return RuleOutcome::Cached(source);
        }
        Ok(Err(e)) => warn!(rule = %target, key = %key, error = %e, "failed to unpack cached artifact, rebuilding"),
        Err(e) => warn!(rule = %target, key = %key, error = %e, "unpack task failed, rebuilding"),
      }
    }
    None => transition(target, RuleState::CacheMiss),
  }

  let Ok(_permit) = Arc::clone(&shared.workers).acquire_owned().await else {
    return RuleOutcome::Failed(BuildError::Internal {
      target: target.clone(),
      message: "worker pool closed".to_string(),
    });
  };
  transition(target, RuleState::Building);
  info!(rule = %target, key = %key, "building");

  let scratch_dir = shared
    .project_root
    .join(&shared.config.output_root)
    .join(SCRATCH_DIR)
    .join(key.to_hex());
  for dir in [&out_dir, &scratch_dir] {
    if let Err(e) = reset_dir(dir).await {
      transition(target, RuleState::Failed);
      return RuleOutcome::Failed(BuildError::Output {
        target: target.clone(),
        path: dir.clone(),
        message: e.to_string(),
      });
    }
  }

  let ctx = StepContext {
    project_root: shared.project_root.clone(),
    out_dir: out_dir.clone(),
    scratch_dir: scratch_dir.clone(),
    srcs: source_paths(&shared, &rule),
    tool: rule.tool().map(|tool| {
      if tool.is_project_relative() {
        shared.project_root.join(&tool.path)
      } else {
        tool.path.clone()
      }
    }),
  };

  let mut failure = None;
  for (index, step) in rule.steps().iter().enumerate() {
    debug!(rule = %target, index, kind = step.kind(), "running step");
    if let Err(source) = execute_step(step, &ctx).await {
      failure = Some(BuildError::Step {
        target: target.clone(),
        index,
        kind: step.kind(),
        source,
      });
      break;
    }
  }
  if let Err(e) = tokio::fs::remove_dir_all(&scratch_dir).await {
    debug!(path = %scratch_dir.display(), error = %e, "failed to remove scratch directory");
  }
  if let Some(error) = failure {
    transition(target, RuleState::Failed);
    return RuleOutcome::Failed(error);
  }

  store(&shared, target, key, out_dir).await;
  transition(target, RuleState::Done);
  RuleOutcome::Built
}

/// Cache lookup on the blocking pool. Timeouts and task failures are misses.
async fn fetch(shared: &Shared, key: RuleKey) -> Option<CacheHit> {
  if shared.cache.is_empty() {
    return None;
  }
  let cache = Arc::clone(&shared.cache);
  let task = tokio::task::spawn_blocking(move || cache.fetch_hit(&key));
  match tokio::time::timeout(shared.config.fetch_timeout, task).await {
    Ok(Ok(hit)) => hit,
    Ok(Err(e)) => {
      warn!(key = %key, error = %e, "cache fetch task failed, treating as miss");
      None
    }
    Err(_) => {
      warn!(
        key = %key,
        timeout_ms = shared.config.fetch_timeout.as_millis() as u64,
        "cache fetch timed out, treating as miss"
      );
      None
    }
  }
}

/// Best-effort: pack the output and offer it to every writable tier.
async fn store(shared: &Shared, target: &BuildTarget, key: RuleKey, out_dir: PathBuf) {
  if !shared.cache.is_writable() {
    return;
  }
  let cache = Arc::clone(&shared.cache);
  let name = target.fully_qualified_name();
  let task = tokio::task::spawn_blocking(move || -> Result<usize, String> {
    let output_hash = hash_directory(&out_dir, &[]).map_err(|e| e.to_string())?;
    let payload = pack_output(&out_dir).map_err(|e| e.to_string())?;
    let artifact = Artifact::new(key, name, output_hash, payload);
    Ok(cache.store_all(&key, &artifact))
  });
  match tokio::time::timeout(shared.config.store_timeout, task).await {
    Ok(Ok(Ok(tiers))) => debug!(rule = %target, key = %key, tiers, "stored artifact"),
    Ok(Ok(Err(e))) => warn!(rule = %target, key = %key, error = %e, "failed to pack output for cache"),
    Ok(Err(e)) => warn!(rule = %target, key = %key, error = %e, "cache store task failed"),
    Err(_) => warn!(rule = %target, key = %key, "cache store timed out"),
  }
}

fn source_paths(shared: &Shared, rule: &BuildRule) -> Vec<PathBuf> {
  rule
    .srcs()
    .iter()
    .filter_map(|src| match src {
      SourcePath::Relative(path) => Some(shared.project_root.join(path)),
      SourcePath::Absolute(path) => Some(path.clone()),
      SourcePath::ArchiveMember(member) => Some(shared.project_root.join(&member.archive)),
      SourcePath::BuildTargetOutput(producer) => shared
        .resolver
        .get_rule(producer)
        .map(|r| shared.project_root.join(r.output_dir())),
    })
    .collect()
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
  match tokio::fs::remove_dir_all(dir).await {
    Ok(()) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(e),
  }
  tokio::fs::create_dir_all(dir).await
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::{Duration, Instant};

  use super::*;
  use crate::cache::{CacheError, CacheMode, MemoryArtifactCache};
  use crate::fs::DiskFilesystem;
  use crate::hasher::ContentHasher;
  use crate::resolver::ResolveError;
  use crate::rule::{InMemoryTargetGraph, Step, TargetNode};
  use crate::tool::ConfiguredToolProvider;
  use crate::util::hash::hash_bytes;
  use tempfile::TempDir;

  fn t(s: &str) -> BuildTarget {
    BuildTarget::parse(s, None).unwrap()
  }

  fn engine(root: &Path, graph: InMemoryTargetGraph, cache: Arc<MemoryArtifactCache>, config: EngineConfig) -> BuildEngine {
    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![cache];
    engine_with_tiers(root, graph, tiers, config)
  }

  fn engine_with_tiers(
    root: &Path,
    graph: InMemoryTargetGraph,
    tiers: Vec<Arc<dyn ArtifactCache>>,
    config: EngineConfig,
  ) -> BuildEngine {
    let fs = Arc::new(DiskFilesystem::new(root));
    let resolver = Arc::new(BuildRuleResolver::new(
      Arc::new(graph),
      Arc::new(ConfiguredToolProvider::default()),
      &config.output_root,
    ));
    let factory = Arc::new(RuleKeyFactory::new(
      Arc::clone(&resolver),
      Arc::new(ContentHasher::new(fs)),
    ));
    BuildEngine::new(resolver, factory, TieredArtifactCache::new(tiers), root, config)
  }

  /// Fails every read and write, counting the attempts.
  #[derive(Debug, Default)]
  struct BrokenCache {
    calls: AtomicUsize,
  }

  impl ArtifactCache for BrokenCache {
    fn name(&self) -> &str {
      "broken"
    }

    fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
      self.calls.fetch_add(1, Ordering::Relaxed);
      Err(CacheError::Corrupt {
        key: *key,
        reason: "unreadable".to_string(),
      })
    }

    fn store(&self, key: &RuleKey, _artifact: &Artifact) -> Result<(), CacheError> {
      self.calls.fetch_add(1, Ordering::Relaxed);
      Err(CacheError::Corrupt {
        key: *key,
        reason: "unwritable".to_string(),
      })
    }

    fn is_writable(&self) -> bool {
      true
    }
  }

  /// Answers every fetch with a miss, slowly.
  #[derive(Debug)]
  struct SlowCache(Duration);

  impl ArtifactCache for SlowCache {
    fn name(&self) -> &str {
      "slow"
    }

    fn fetch(&self, _key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
      std::thread::sleep(self.0);
      Ok(None)
    }

    fn store(&self, _key: &RuleKey, _artifact: &Artifact) -> Result<(), CacheError> {
      Ok(())
    }

    fn is_writable(&self) -> bool {
      false
    }
  }

  fn config() -> EngineConfig {
    EngineConfig {
      threads: 4,
      ..Default::default()
    }
  }

  fn lib_and_app() -> InMemoryTargetGraph {
    InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:lib"), "genrule").with_step(Step::write_file("lib.txt", "lib")))
      .with_node(
        TargetNode::new(t("//:app"), "genrule")
          .with_dep(t("//:lib"))
          .with_step(Step::write_file("app.txt", "app")),
      )
  }

  #[tokio::test]
  async fn builds_then_restores_from_cache() {
    let temp = TempDir::new().unwrap();
    let cache = Arc::new(MemoryArtifactCache::default());

    let first = engine(temp.path(), lib_and_app(), cache.clone(), config());
    let result = first.build(&[t("//:app")]).await.unwrap();
    assert_eq!(result.exit_code(), 0);
    assert!(matches!(result.get(&t("//:lib")), Some(TargetOutcome::Built { .. })));
    let app = result.get(&t("//:app")).unwrap().output().unwrap().clone();
    assert_eq!(std::fs::read_to_string(app.join("app.txt")).unwrap(), "app");
    assert_eq!(cache.len(), 2);

    std::fs::remove_dir_all(temp.path().join("cachet-out")).unwrap();
    let second = engine(temp.path(), lib_and_app(), cache.clone(), config());
    let result = second.build(&[t("//:app")]).await.unwrap();
    assert!(matches!(
      result.get(&t("//:app")),
      Some(TargetOutcome::Cached { source, .. }) if source == "memory"
    ));
    assert_eq!(std::fs::read_to_string(app.join("app.txt")).unwrap(), "app");
  }

  #[tokio::test]
  async fn failing_cache_tier_does_not_fail_the_build() {
    let temp = TempDir::new().unwrap();
    let broken = Arc::new(BrokenCache::default());
    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![broken.clone()];
    let result = engine_with_tiers(temp.path(), lib_and_app(), tiers, config())
      .build(&[t("//:app")])
      .await
      .unwrap();

    assert!(matches!(result.get(&t("//:lib")), Some(TargetOutcome::Built { .. })));
    assert!(matches!(result.get(&t("//:app")), Some(TargetOutcome::Built { .. })));
    assert_eq!(result.exit_code(), 0);
    // One fetch and one store per rule.
    assert_eq!(broken.calls.load(Ordering::Relaxed), 4);
  }

  #[tokio::test]
  async fn unreadable_cached_artifact_is_rebuilt() {
    let temp = TempDir::new().unwrap();
    let cache = Arc::new(MemoryArtifactCache::default());
    let engine = engine(temp.path(), lib_and_app(), cache.clone(), config());

    let rule = engine.resolver().require_rule(&t("//:lib")).unwrap();
    let key = engine.rule_key_factory().build(&rule).unwrap();
    let garbage = Artifact::new(key, "//:lib", hash_bytes(b"x"), b"not a tarball".to_vec());
    cache.store(&key, &garbage).unwrap();

    let result = engine.build(&[t("//:lib")]).await.unwrap();
    let outcome = result.get(&t("//:lib")).unwrap();
    assert!(matches!(outcome, TargetOutcome::Built { .. }), "{outcome:?}");
    let out = outcome.output().unwrap();
    assert_eq!(std::fs::read_to_string(out.join("lib.txt")).unwrap(), "lib");

    let repaired = cache.fetch(&key).unwrap().unwrap();
    assert_ne!(repaired.payload, garbage.payload);
  }

  #[tokio::test]
  async fn slow_cache_fetch_times_out_as_a_miss() {
    let temp = TempDir::new().unwrap();
    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![Arc::new(SlowCache(Duration::from_secs(1)))];
    let config = EngineConfig {
      fetch_timeout: Duration::from_millis(20),
      ..config()
    };
    let engine = engine_with_tiers(temp.path(), lib_and_app(), tiers, config);

    let started = Instant::now();
    let result = engine.build(&[t("//:lib")]).await.unwrap();
    assert!(matches!(result.get(&t("//:lib")), Some(TargetOutcome::Built { .. })));
    assert!(started.elapsed() < Duration::from_millis(500));
  }

  #[tokio::test]
  async fn read_only_cache_is_not_written() {
    let temp = TempDir::new().unwrap();
    let cache = Arc::new(MemoryArtifactCache::new("ro", CacheMode::ReadOnly));
    let result = engine(temp.path(), lib_and_app(), cache.clone(), config())
      .build(&[t("//:lib")])
      .await
      .unwrap();
    assert!(result.is_success());
    assert!(cache.is_empty());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn outputs_of_dependencies_are_visible_as_sources() {
    let temp = TempDir::new().unwrap();
    let graph = InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:gen"), "genrule").with_step(Step::write_file("data.txt", "generated")))
      .with_node(
        TargetNode::new(t("//:use"), "genrule")
          .with_src(SourcePath::parse("//:gen").unwrap())
          .with_step(Step::cmd("cp \"$SRCS/data.txt\" \"$OUT/copy.txt\"")),
      );
    let engine = engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config());
    let result = engine.build(&[t("//:use")]).await.unwrap();
    assert_eq!(result.exit_code(), 0, "{result:?}");
    assert!(result.get(&t("//:gen")).unwrap().is_success());
    let out = result.get(&t("//:use")).unwrap().output().unwrap();
    assert_eq!(std::fs::read_to_string(out.join("copy.txt")).unwrap(), "generated");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failure_skips_dependents_and_keeps_going() {
    let temp = TempDir::new().unwrap();
    let graph = InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:bad"), "genrule").with_step(Step::cmd("echo nope >&2; exit 1")))
      .with_node(TargetNode::new(t("//:dep"), "genrule").with_dep(t("//:bad")))
      .with_node(TargetNode::new(t("//:top"), "genrule").with_dep(t("//:dep")))
      .with_node(TargetNode::new(t("//:ok"), "genrule").with_step(Step::write_file("ok", "ok")));
    let engine = engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config());
    let result = engine.build(&[t("//:top"), t("//:ok")]).await.unwrap();

    match result.get(&t("//:bad")) {
      Some(TargetOutcome::Failed {
        error: BuildError::Step { source, .. },
        ..
      }) => {
        assert!(matches!(source, StepError::CommandFailed { code: Some(1), stderr_tail, .. } if stderr_tail == "nope"));
      }
      other => panic!("expected step failure, got {other:?}"),
    }
    for skipped in ["//:dep", "//:top"] {
      assert_eq!(
        result.get(&t(skipped)),
        Some(&TargetOutcome::Skipped { dependency: t("//:bad") })
      );
    }
    assert!(matches!(result.get(&t("//:ok")), Some(TargetOutcome::Built { .. })));
    assert_eq!(result.exit_code(), 1);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn first_failure_stops_scheduling_without_keep_going() {
    let temp = TempDir::new().unwrap();
    let graph = InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:bad"), "genrule").with_step(Step::cmd("exit 1")))
      .with_node(TargetNode::new(t("//:slow"), "genrule").with_step(Step::cmd("sleep 0.5")))
      .with_node(TargetNode::new(t("//:after"), "genrule").with_dep(t("//:slow")));
    let config = EngineConfig {
      threads: 2,
      keep_going: false,
      ..Default::default()
    };
    let engine = engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config);
    let result = engine.build(&[t("//:bad"), t("//:after")]).await.unwrap();

    assert!(matches!(result.get(&t("//:bad")), Some(TargetOutcome::Failed { .. })));
    assert!(matches!(result.get(&t("//:slow")), Some(TargetOutcome::Built { .. })));
    assert_eq!(result.get(&t("//:after")), Some(&TargetOutcome::Cancelled));
    assert_eq!(result.exit_code(), 1);
  }

  #[tokio::test]
  async fn unresolvable_and_unhashable_targets_fail_alone() {
    let temp = TempDir::new().unwrap();
    let graph = lib_and_app()
      .with_node(TargetNode::new(t("//:nosrc"), "genrule").with_src(SourcePath::relative("missing.c")));
    let engine = engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config());
    let result = engine
      .build(&[t("//:ghost"), t("//:nosrc"), t("//:lib")])
      .await
      .unwrap();

    assert!(matches!(
      result.get(&t("//:ghost")),
      Some(TargetOutcome::Failed { error: BuildError::Resolve(ResolveError::NoSuchTarget { .. }), .. })
    ));
    let nosrc = result.get(&t("//:nosrc")).unwrap().error().unwrap();
    assert_eq!(nosrc.class(), ErrorClass::Io);
    assert!(result.get(&t("//:lib")).unwrap().is_success());
    assert_eq!(result.exit_code(), 1);
  }

  #[cfg(unix)]
  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_builds_run_steps_once() {
    let temp = TempDir::new().unwrap();
    let graph = InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:once"), "genrule").with_step(Step::cmd("echo run >> runs.log; sleep 0.2")));
    let engine = Arc::new(engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config()));

    let targets = [t("//:once")];
    let (a, b) = tokio::join!(engine.build(&targets), engine.build(&targets));
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    let runs = std::fs::read_to_string(temp.path().join("runs.log")).unwrap();
    assert_eq!(runs.lines().count(), 1);
  }

  #[cfg(unix)]
  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn cancel_aborts_running_commands() {
    let temp = TempDir::new().unwrap();
    let graph = InMemoryTargetGraph::new()
      .with_node(TargetNode::new(t("//:sleepy"), "genrule").with_step(Step::cmd("sleep 30")))
      .with_node(TargetNode::new(t("//:after"), "genrule").with_dep(t("//:sleepy")));
    let engine = Arc::new(engine(temp.path(), graph, Arc::new(MemoryArtifactCache::default()), config()));
    let handle = engine.cancel_handle();

    let started = Instant::now();
    let building = {
      let engine = Arc::clone(&engine);
      tokio::spawn(async move { engine.build(&[t("//:after")]).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();
    let result = building.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.get(&t("//:sleepy")), Some(&TargetOutcome::Cancelled));
    assert_eq!(result.get(&t("//:after")), Some(&TargetOutcome::Cancelled));
    assert_eq!(result.exit_code(), 130);
    assert!(handle.is_cancelled());
  }

  #[tokio::test]
  async fn empty_request_is_rejected() {
    let temp = TempDir::new().unwrap();
    let engine = engine(temp.path(), lib_and_app(), Arc::new(MemoryArtifactCache::default()), config());
    assert!(matches!(engine.build(&[]).await, Err(EngineError::NoTargets)));
  }
}
