//! Outcomes, errors and configuration for build execution.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_OUTPUT_DIR, DEFAULT_STORE_TIMEOUT_MS};
use crate::hasher::HashError;
use crate::resolver::ResolveError;
use crate::rulekey::{RuleKey, RuleKeyError};
use crate::target::BuildTarget;

/// Broad category of a target-scoped failure. Drives the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorClass {
  /// Bad build graph or malformed inputs.
  Input,
  /// Missing or unreadable files.
  Io,
  /// A step or tool failed.
  Tool,
  /// An invariant of the engine itself was violated.
  Internal,
}

impl fmt::Display for ErrorClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ErrorClass::Input => "input",
      ErrorClass::Io => "io",
      ErrorClass::Tool => "tool",
      ErrorClass::Internal => "internal",
    })
  }
}

/// Failure of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
  #[error("command failed with exit code {}: {cmd}{}", display_code(.code), display_tail(.stderr_tail))]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr_tail: String,
  },

  #[error("failed to spawn {cmd}: {message}")]
  Spawn { cmd: String, message: String },

  #[error("{path} is outside the output directory")]
  EscapesOutput { path: String },

  #[error("i/o error at {path}: {message}")]
  Io { path: PathBuf, message: String },
}

impl StepError {
  pub(crate) fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
    StepError::Io {
      path: path.into(),
      message: error.to_string(),
    }
  }

  pub fn class(&self) -> ErrorClass {
    match self {
      StepError::CommandFailed { .. } | StepError::Spawn { .. } => ErrorClass::Tool,
      StepError::EscapesOutput { .. } => ErrorClass::Input,
      StepError::Io { .. } => ErrorClass::Io,
    }
  }
}

fn display_code(code: &Option<i32>) -> String {
  match code {
    Some(code) => code.to_string(),
    None => "none (killed by signal)".to_string(),
  }
}

fn display_tail(tail: &str) -> String {
  if tail.is_empty() {
    String::new()
  } else {
    format!("\n{tail}")
  }
}

/// Why a target did not build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("failed to compute rule key for {target}: {message}")]
  RuleKey {
    target: BuildTarget,
    message: String,
    class: ErrorClass,
  },

  #[error("{target}: step {index} ({kind}) failed: {source}")]
  Step {
    target: BuildTarget,
    index: usize,
    kind: &'static str,
    #[source]
    source: StepError,
  },

  #[error("{target}: failed to prepare output {path}: {message}")]
  Output {
    target: BuildTarget,
    path: PathBuf,
    message: String,
  },

  #[error("{target}: internal error: {message}")]
  Internal { target: BuildTarget, message: String },
}

impl BuildError {
  pub(crate) fn rule_key(target: &BuildTarget, error: &RuleKeyError) -> Self {
    let class = match error {
      RuleKeyError::MissingContentHash {
        source: HashError::Io { .. },
        ..
      } => ErrorClass::Io,
      RuleKeyError::MissingContentHash { .. } | RuleKeyError::UnsupportedValueType { .. } => ErrorClass::Input,
      RuleKeyError::RuleNotIndexed(_) | RuleKeyError::UnknownRule(_) => ErrorClass::Internal,
    };
    BuildError::RuleKey {
      target: target.clone(),
      message: error.to_string(),
      class,
    }
  }

  pub fn class(&self) -> ErrorClass {
    match self {
      BuildError::Resolve(ResolveError::Tool { .. }) => ErrorClass::Tool,
      BuildError::Resolve(ResolveError::Internal(_)) => ErrorClass::Internal,
      BuildError::Resolve(_) => ErrorClass::Input,
      BuildError::RuleKey { class, .. } => *class,
      BuildError::Step { source, .. } => source.class(),
      BuildError::Output { .. } => ErrorClass::Io,
      BuildError::Internal { .. } => ErrorClass::Internal,
    }
  }
}

/// Errors that abort a whole build rather than a single target.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("dependency cycle detected among {0}")]
  CycleDetected(BuildTarget),

  #[error("no targets requested")]
  NoTargets,
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetOutcome {
  /// Steps ran and produced the output.
  Built { key: RuleKey, output: PathBuf },
  /// Output restored from a cache tier.
  Cached {
    key: RuleKey,
    output: PathBuf,
    source: String,
  },
  Failed { key: Option<RuleKey>, error: BuildError },
  /// Not attempted because a dependency did not succeed.
  Skipped { dependency: BuildTarget },
  Cancelled,
}

impl TargetOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, TargetOutcome::Built { .. } | TargetOutcome::Cached { .. })
  }

  pub fn key(&self) -> Option<RuleKey> {
    match self {
      TargetOutcome::Built { key, .. } | TargetOutcome::Cached { key, .. } => Some(*key),
      TargetOutcome::Failed { key, .. } => *key,
      TargetOutcome::Skipped { .. } | TargetOutcome::Cancelled => None,
    }
  }

  pub fn output(&self) -> Option<&PathBuf> {
    match self {
      TargetOutcome::Built { output, .. } | TargetOutcome::Cached { output, .. } => Some(output),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&BuildError> {
    match self {
      TargetOutcome::Failed { error, .. } => Some(error),
      _ => None,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      TargetOutcome::Built { .. } => "built",
      TargetOutcome::Cached { .. } => "cached",
      TargetOutcome::Failed { .. } => "failed",
      TargetOutcome::Skipped { .. } => "skipped",
      TargetOutcome::Cancelled => "cancelled",
    }
  }
}

/// Per-target outcomes of one `BuildEngine::build` call, covering requested
/// targets and everything built on their behalf.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
  pub requested: Vec<BuildTarget>,
  pub outcomes: BTreeMap<BuildTarget, TargetOutcome>,
}

impl BuildResult {
  pub fn get(&self, target: &BuildTarget) -> Option<&TargetOutcome> {
    self.outcomes.get(target)
  }

  pub fn is_success(&self) -> bool {
    self.outcomes.values().all(TargetOutcome::is_success)
  }

  pub fn failures(&self) -> impl Iterator<Item = (&BuildTarget, &BuildError)> {
    self
      .outcomes
      .iter()
      .filter_map(|(target, outcome)| outcome.error().map(|e| (target, e)))
  }

  pub fn count(&self, label: &str) -> usize {
    self.outcomes.values().filter(|o| o.label() == label).count()
  }

  /// `0` success, `1` build failure, `70` internal error, `130` cancelled
  /// without any other failure.
  pub fn exit_code(&self) -> i32 {
    if self.failures().any(|(_, e)| e.class() == ErrorClass::Internal) {
      70
    } else if self.failures().next().is_some()
      || self.outcomes.values().any(|o| matches!(o, TargetOutcome::Skipped { .. }))
    {
      1
    } else if self.outcomes.values().any(|o| matches!(o, TargetOutcome::Cancelled)) {
      130
    } else {
      0
    }
  }
}

/// Tuning for a `BuildEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Maximum rules building at once.
  pub threads: usize,
  /// Keep building independent rules after a failure.
  pub keep_going: bool,
  pub fetch_timeout: Duration,
  pub store_timeout: Duration,
  /// Scratch space lives under `<output_root>/tmp`.
  pub output_root: PathBuf,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
      keep_going: true,
      fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
      store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
      output_root: PathBuf::from(DEFAULT_OUTPUT_DIR),
    }
  }
}
