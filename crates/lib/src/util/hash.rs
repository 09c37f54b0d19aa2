//! SHA-256 helpers over bytes, files and directory trees on local disk.
//!
//! These operate on real paths outside of any [`ProjectFilesystem`] and are
//! used for artifact verification and rule-key log inspection. Source inputs
//! are hashed through [`crate::hasher::ContentHasher`] instead.
//!
//! [`ProjectFilesystem`]: crate::fs::ProjectFilesystem

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  /// Wrap a finished digest.
  pub fn from_digest(digest: impl AsRef<[u8]>) -> Self {
    ContentHash(hex::encode(digest))
  }

  /// The first `len` characters, for display.
  pub fn short(&self, len: usize) -> &str {
    &self.0[..len.min(self.0.len())]
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing files or directories on disk.
#[derive(Debug, thiserror::Error)]
pub enum DiskHashError {
  #[error("failed to walk {path}: {message}")]
  Walk { path: String, message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Deterministic hash of a directory tree.
///
/// Each entry contributes `F:<rel>:<hash>`, `D:<rel>` or `L:<rel>:<hash of
/// link target>`, sorted by relative path and joined with `\n`. Timestamps and
/// permissions are ignored. Entries whose file name is in `exclude` are
/// skipped along with their children.
pub fn hash_directory(path: &Path, exclude: &[&str]) -> Result<ContentHash, DiskHashError> {
  let mut entries: Vec<(String, String)> = Vec::new();

  let walker = WalkDir::new(path).sort_by_file_name().into_iter().filter_entry(|e| {
    e.file_name()
      .to_str()
      .map(|name| !exclude.contains(&name))
      .unwrap_or(true)
  });

  for entry in walker {
    let entry = entry.map_err(|e| DiskHashError::Walk {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    let entry_path = entry.path();

    let rel_path = relative_slash_path(entry_path, path);
    if rel_path.is_empty() {
      continue;
    }

    let file_type = entry.file_type();
    let line = if file_type.is_file() {
      format!("F:{}:{}", rel_path, hash_file(entry_path)?)
    } else if file_type.is_dir() {
      format!("D:{}", rel_path)
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|source| DiskHashError::Read {
        path: entry_path.display().to_string(),
        source,
      })?;
      format!("L:{}:{}", rel_path, hash_bytes(target.to_string_lossy().as_bytes()))
    } else {
      continue;
    };

    entries.push((rel_path, line));
  }

  entries.sort_by(|a, b| a.0.cmp(&b.0));

  let mut hasher = Sha256::new();
  for (_, line) in entries {
    hasher.update(line.as_bytes());
    hasher.update(b"\n");
  }

  Ok(ContentHash::from_digest(hasher.finalize()))
}

/// Streaming hash of a single file.
pub fn hash_file(path: &Path) -> Result<ContentHash, DiskHashError> {
  let read_err = |source| DiskHashError::Read {
    path: path.display().to_string(),
    source,
  };
  let mut file = fs::File::open(path).map_err(read_err)?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  loop {
    let n = file.read(&mut buffer).map_err(read_err)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }

  Ok(ContentHash::from_digest(hasher.finalize()))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::from_digest(Sha256::digest(data))
}

/// `child` relative to `base`, always with `/` separators.
pub fn relative_slash_path(child: &Path, base: &Path) -> String {
  let rel = child.strip_prefix(base).unwrap_or(child);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
