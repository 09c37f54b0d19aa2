//! Artifact cache in a local directory.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! └── <k[0..2]>/
//!     ├── <k>.artifact   # gzipped tar payload
//!     └── <k>.json       # ArtifactMetadata, written last
//! ```

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::types::{Artifact, ArtifactCache, ArtifactMetadata, CacheError, CacheMode};
use crate::rulekey::RuleKey;

#[derive(Debug, Clone)]
pub struct DirArtifactCache {
  dir: PathBuf,
  mode: CacheMode,
}

impl DirArtifactCache {
  pub fn new(dir: impl Into<PathBuf>, mode: CacheMode) -> Self {
    Self { dir: dir.into(), mode }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn shard(&self, key: &RuleKey) -> PathBuf {
    let hex = key.to_hex();
    self.dir.join(&hex[..2])
  }

  fn payload_path(&self, key: &RuleKey) -> PathBuf {
    self.shard(key).join(format!("{key}.artifact"))
  }

  fn metadata_path(&self, key: &RuleKey) -> PathBuf {
    self.shard(key).join(format!("{key}.json"))
  }
}

/// Write `contents` to a temp file beside `path`, then rename it into place.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
  let parent = path.parent().unwrap_or(Path::new("."));
  let io_err = |source| CacheError::Io {
    path: path.to_path_buf(),
    source,
  };
  let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
  temp.write_all(contents).map_err(io_err)?;
  temp.as_file().sync_all().map_err(io_err)?;
  temp.persist(path).map_err(|e| io_err(e.error))?;
  Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
  match fs::read(path) {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(source) => Err(CacheError::Io {
      path: path.to_path_buf(),
      source,
    }),
  }
}

impl ArtifactCache for DirArtifactCache {
  fn name(&self) -> &str {
    "dir"
  }

  fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
    if !self.mode.can_read() {
      return Ok(None);
    }
    let Some(metadata) = read_optional(&self.metadata_path(key))? else {
      return Ok(None);
    };
    let metadata: ArtifactMetadata = serde_json::from_slice(&metadata).map_err(|e| CacheError::Corrupt {
      key: *key,
      reason: format!("unreadable metadata: {e}"),
    })?;
    let Some(payload) = read_optional(&self.payload_path(key))? else {
      return Err(CacheError::Corrupt {
        key: *key,
        reason: "metadata present but payload missing".to_string(),
      });
    };

    let artifact = Artifact { metadata, payload };
    artifact.verify(key)?;
    debug!(cache = %self.dir.display(), key = %key, "dir cache hit");
    Ok(Some(artifact))
  }

  fn store(&self, key: &RuleKey, artifact: &Artifact) -> Result<(), CacheError> {
    if !self.mode.can_write() {
      return Err(CacheError::ReadOnly {
        name: self.name().to_string(),
      });
    }
    let shard = self.shard(key);
    fs::create_dir_all(&shard).map_err(|source| CacheError::Io { path: shard, source })?;

    // Payload first: a reader only trusts entries whose metadata exists.
    write_atomic(&self.payload_path(key), &artifact.payload)?;
    let metadata = serde_json::to_vec_pretty(&artifact.metadata).map_err(|e| CacheError::Corrupt {
      key: *key,
      reason: format!("unserializable metadata: {e}"),
    })?;
    write_atomic(&self.metadata_path(key), &metadata)?;

    debug!(cache = %self.dir.display(), key = %key, bytes = artifact.payload.len(), "stored artifact");
    Ok(())
  }

  fn is_writable(&self) -> bool {
    self.mode.can_write()
  }
}
