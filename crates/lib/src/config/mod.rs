//! Project configuration.
//!
//! Read from `<project>/.cachet.toml`. Every section and key is optional:
//!
//! ```toml
//! [build]
//! threads = 8
//! keep_going = true
//! output_dir = "cachet-out"
//! rule_key_log = "cachet-out/log/rulekeys.jsonl"
//!
//! [cache]
//! dir = "/var/cache/cachet"
//! mode = "readwrite"        # readwrite | readonly | disabled
//! fetch_timeout_ms = 10000
//! store_timeout_ms = 30000
//!
//! [tools.cc]
//! path = "/usr/bin/cc"
//! version = "13.2"
//! ```
//!
//! `CACHET_CACHE_DIR`, `CACHET_THREADS` and `CACHET_CACHE_MODE` override the
//! file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::CacheMode;
use crate::consts::{
  CONFIG_FILE_NAME, DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_OUTPUT_DIR, DEFAULT_STORE_TIMEOUT_MS, ENV_CACHE_DIR,
  ENV_CACHE_MODE, ENV_THREADS,
};
use crate::engine::EngineConfig;
use crate::platform::paths;
use crate::tool::ToolConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid value {value:?} for {name}: {message}")]
  InvalidEnv {
    name: &'static str,
    value: String,
    message: String,
  },

  #[error("invalid configuration: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachetConfig {
  pub build: BuildSection,
  pub cache: CacheSection,
  pub tools: BTreeMap<String, ToolConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
  /// Worker count; defaults to the available parallelism.
  pub threads: Option<usize>,
  pub keep_going: bool,
  /// Relative to the project root.
  pub output_dir: PathBuf,
  /// Where to write the rule-key log, relative to the project root.
  pub rule_key_log: Option<PathBuf>,
}

impl Default for BuildSection {
  fn default() -> Self {
    Self {
      threads: None,
      keep_going: true,
      output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
      rule_key_log: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
  /// Local artifact directory; defaults to `<cache dir>/artifacts`.
  pub dir: Option<PathBuf>,
  pub mode: CacheMode,
  pub fetch_timeout_ms: u64,
  pub store_timeout_ms: u64,
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      dir: None,
      mode: CacheMode::ReadWrite,
      fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
      store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
    }
  }
}

impl CachetConfig {
  /// `<project_root>/.cachet.toml` if present, then environment overrides.
  pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
    let mut config = Self::load_from_path(&project_root.join(CONFIG_FILE_NAME))?;
    config.apply_env()?;
    Ok(config)
  }

  /// The file alone, or defaults when it does not exist.
  pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      debug!(path = %path.display(), "no config file, using defaults");
      return Ok(Self::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.validate()?;
    Ok(config)
  }

  pub fn apply_env(&mut self) -> Result<(), ConfigError> {
    if let Some(dir) = std::env::var_os(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
      self.cache.dir = Some(PathBuf::from(dir));
    }
    if let Ok(value) = std::env::var(ENV_THREADS) {
      let threads = value.trim().parse::<usize>().map_err(|e| ConfigError::InvalidEnv {
        name: ENV_THREADS,
        value: value.clone(),
        message: e.to_string(),
      })?;
      self.build.threads = Some(threads);
    }
    if let Ok(value) = std::env::var(ENV_CACHE_MODE) {
      self.cache.mode = value.parse().map_err(|e: crate::cache::InvalidCacheMode| ConfigError::InvalidEnv {
        name: ENV_CACHE_MODE,
        value: value.clone(),
        message: e.to_string(),
      })?;
    }
    self.validate()
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.build.threads == Some(0) {
      return Err(ConfigError::Invalid("build.threads must be at least 1".to_string()));
    }
    if self.build.output_dir.is_absolute() {
      return Err(ConfigError::Invalid(format!(
        "build.output_dir must be relative to the project root, got {}",
        self.build.output_dir.display()
      )));
    }
    Ok(())
  }

  pub fn threads(&self) -> usize {
    self
      .build
      .threads
      .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
  }

  pub fn cache_dir(&self) -> PathBuf {
    self
      .cache
      .dir
      .clone()
      .unwrap_or_else(|| paths::cache_dir().join("artifacts"))
  }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      threads: self.threads(),
      keep_going: self.build.keep_going,
      fetch_timeout: Duration::from_millis(self.cache.fetch_timeout_ms),
      store_timeout: Duration::from_millis(self.cache.store_timeout_ms),
      output_root: self.build.output_dir.clone(),
    }
  }
}
