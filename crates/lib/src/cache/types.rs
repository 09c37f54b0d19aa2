use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::ARTIFACT_FORMAT_VERSION;
use crate::rulekey::RuleKey;
use crate::util::hash::{ContentHash, hash_bytes};

/// Describes a stored artifact. Written last, so its presence marks the
/// entry complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
  pub rule_key: RuleKey,
  pub target: String,
  /// Hash of the output directory the payload was packed from.
  pub output_hash: ContentHash,
  /// Hash of the payload bytes, checked on fetch.
  pub payload_hash: ContentHash,
  pub created_at_unix: u64,
  #[serde(default = "default_format_version")]
  pub format_version: u32,
}

fn default_format_version() -> u32 {
  ARTIFACT_FORMAT_VERSION
}

/// A cached rule output: metadata plus a gzipped tar of the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub metadata: ArtifactMetadata,
  pub payload: Vec<u8>,
}

impl Artifact {
  pub fn new(rule_key: RuleKey, target: impl Into<String>, output_hash: ContentHash, payload: Vec<u8>) -> Self {
    let created_at_unix = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or_default();
    Self {
      metadata: ArtifactMetadata {
        rule_key,
        target: target.into(),
        output_hash,
        payload_hash: hash_bytes(&payload),
        created_at_unix,
        format_version: ARTIFACT_FORMAT_VERSION,
      },
      payload,
    }
  }

  /// Check the metadata against the key it was looked up under and the
  /// payload it came with.
  pub fn verify(&self, key: &RuleKey) -> Result<(), CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt { key: *key, reason };
    if self.metadata.rule_key != *key {
      return Err(corrupt(format!("metadata names rule key {}", self.metadata.rule_key)));
    }
    if self.metadata.format_version != ARTIFACT_FORMAT_VERSION {
      return Err(corrupt(format!(
        "format version {} (expected {ARTIFACT_FORMAT_VERSION})",
        self.metadata.format_version
      )));
    }
    let actual = hash_bytes(&self.payload);
    if actual != self.metadata.payload_hash {
      return Err(corrupt(format!(
        "payload hash {} does not match {}",
        actual.short(12),
        self.metadata.payload_hash.short(12)
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("corrupt cache entry for {key}: {reason}")]
  Corrupt { key: RuleKey, reason: String },

  #[error("cache '{name}' is not writable")]
  ReadOnly { name: String },

  #[error("failed to pack output directory {path}: {source}")]
  Pack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to unpack artifact into {path}: {source}")]
  Unpack {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// How a cache tier may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
  #[default]
  ReadWrite,
  ReadOnly,
  Disabled,
}

impl CacheMode {
  pub fn can_read(self) -> bool {
    !matches!(self, CacheMode::Disabled)
  }

  pub fn can_write(self) -> bool {
    matches!(self, CacheMode::ReadWrite)
  }
}

impl fmt::Display for CacheMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CacheMode::ReadWrite => "readwrite",
      CacheMode::ReadOnly => "readonly",
      CacheMode::Disabled => "disabled",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown cache mode '{0}' (expected readwrite, readonly or disabled)")]
pub struct InvalidCacheMode(pub String);

impl FromStr for CacheMode {
  type Err = InvalidCacheMode;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "readwrite" => Ok(CacheMode::ReadWrite),
      "readonly" => Ok(CacheMode::ReadOnly),
      "disabled" => Ok(CacheMode::Disabled),
      _ => Err(InvalidCacheMode(s.to_string())),
    }
  }
}

/// A store of artifacts addressed by rule key.
///
/// Implementations are blocking; the engine calls them on tokio's blocking
/// pool.
pub trait ArtifactCache: Send + Sync + fmt::Debug {
  fn name(&self) -> &str;

  fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError>;

  fn store(&self, key: &RuleKey, artifact: &Artifact) -> Result<(), CacheError>;

  fn is_writable(&self) -> bool;
}
