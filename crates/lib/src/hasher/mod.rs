//! Memoizing content hasher for source inputs.
//!
//! Files hash to the SHA-256 of their bytes. Directories hash to the SHA-256
//! of their sorted `F:<rel>:<hash>` / `D:<rel>` lines joined by `\n`, so the
//! result does not depend on traversal order. Archive members are read out of
//! zip files. Results are cached per absolute path for the hasher's lifetime.

mod archive;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

use crate::fs::{FsError, ProjectFilesystem};
use crate::util::hash::{ContentHash, hash_bytes};

pub use archive::ArchiveMemberPath;

#[derive(Debug, Error)]
pub enum HashError {
  #[error("failed to hash {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("{member} does not exist in archive {archive}")]
  InvalidArchiveMember { archive: PathBuf, member: PathBuf },

  #[error("failed to read archive {path}: {message}")]
  InvalidArchive { path: PathBuf, message: String },
}

impl From<FsError> for HashError {
  fn from(err: FsError) -> Self {
    match err {
      FsError::Io { path, source } => HashError::Io { path, source },
    }
  }
}

#[derive(Debug)]
pub struct ContentHasher {
  fs: Arc<dyn ProjectFilesystem>,
  paths: DashMap<PathBuf, ContentHash>,
  members: DashMap<ArchiveMemberPath, ContentHash>,
}

impl ContentHasher {
  pub fn new(fs: Arc<dyn ProjectFilesystem>) -> Self {
    Self {
      fs,
      paths: DashMap::new(),
      members: DashMap::new(),
    }
  }

  pub fn filesystem(&self) -> &Arc<dyn ProjectFilesystem> {
    &self.fs
  }

  /// Hash of a file or directory; relative paths resolve against the project root.
  pub fn hash(&self, path: &Path) -> Result<ContentHash, HashError> {
    let absolute = self.fs.resolve(path);
    if let Some(hash) = self.paths.get(&absolute) {
      return Ok(hash.clone());
    }

    let hash = if self.fs.is_dir(&absolute) {
      self.hash_dir(&absolute)?
    } else {
      hash_bytes(&self.fs.read(&absolute)?)
    };
    trace!(path = %absolute.display(), hash = %hash, "hashed path");

    Ok(self.paths.entry(absolute).or_insert(hash).clone())
  }

  /// Hash of a single member of a zip archive.
  pub fn hash_archive_member(&self, path: &ArchiveMemberPath) -> Result<ContentHash, HashError> {
    let key = ArchiveMemberPath::new(self.fs.resolve(&path.archive), path.member.clone());
    if let Some(hash) = self.members.get(&key) {
      return Ok(hash.clone());
    }

    let bytes = self.fs.read(&key.archive)?;
    let contents = archive::read_member(&key.archive, &bytes, &key.member)?;
    let hash = hash_bytes(&contents);
    trace!(path = %key, hash = %hash, "hashed archive member");

    Ok(self.members.entry(key).or_insert(hash).clone())
  }

  /// Drop cached hashes for `path`, everything under it, and every directory containing it.
  pub fn invalidate(&self, path: &Path) {
    let absolute = self.fs.resolve(path);
    self
      .paths
      .retain(|cached, _| !(absolute.starts_with(cached) || cached.starts_with(&absolute)));
    self.members.retain(|cached, _| !cached.archive.starts_with(&absolute));
  }

  /// Number of cached path and member hashes.
  pub fn len(&self) -> usize {
    self.paths.len() + self.members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn hash_dir(&self, dir: &Path) -> Result<ContentHash, HashError> {
    let mut lines: Vec<(String, String)> = Vec::new();
    let mut pending: Vec<(PathBuf, String)> = vec![(dir.to_path_buf(), String::new())];

    while let Some((current, rel)) = pending.pop() {
      for name in self.fs.read_dir(&current)? {
        let child = current.join(&name);
        let child_rel = if rel.is_empty() {
          name
        } else {
          format!("{rel}/{name}")
        };
        if self.fs.is_dir(&child) {
          lines.push((child_rel.clone(), format!("D:{child_rel}")));
          pending.push((child, child_rel));
        } else {
          let hash = self.hash(&child)?;
          lines.push((child_rel.clone(), format!("F:{child_rel}:{hash}")));
        }
      }
    }

    lines.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (_, line) in &lines {
      hasher.update(line.as_bytes());
      hasher.update(b"\n");
    }
    Ok(ContentHash::from_digest(hasher.finalize()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fs::{DiskFilesystem, MemoryFilesystem};
  use tempfile::tempdir;

  fn hasher(fs: MemoryFilesystem) -> ContentHasher {
    ContentHasher::new(Arc::new(fs))
  }

  #[test]
  fn file_hash_is_sha256_of_contents() {
    let h = hasher(MemoryFilesystem::default().with_file("a.txt", "hello"));
    assert_eq!(h.hash(Path::new("a.txt")).unwrap(), hash_bytes(b"hello"));
    assert_eq!(h.hash(Path::new("/project/a.txt")).unwrap(), hash_bytes(b"hello"));
    assert_eq!(h.len(), 1);
  }

  #[test]
  fn directory_hash_ignores_creation_order() {
    let first = hasher(
      MemoryFilesystem::default()
        .with_file("d/b.txt", "b")
        .with_file("d/a.txt", "a")
        .with_file("d/sub/c.txt", "c"),
    );
    let second = hasher(
      MemoryFilesystem::default()
        .with_file("d/sub/c.txt", "c")
        .with_file("d/a.txt", "a")
        .with_file("d/b.txt", "b"),
    );
    assert_eq!(
      first.hash(Path::new("d")).unwrap(),
      second.hash(Path::new("d")).unwrap()
    );
  }

  #[test]
  fn directory_hash_matches_on_disk_layout() {
    let temp = tempdir().unwrap();
    std::fs::create_dir_all(temp.path().join("d/sub")).unwrap();
    std::fs::write(temp.path().join("d/a.txt"), "a").unwrap();
    std::fs::write(temp.path().join("d/sub/c.txt"), "c").unwrap();

    let memory = hasher(
      MemoryFilesystem::new(temp.path())
        .with_file("d/a.txt", "a")
        .with_file("d/sub/c.txt", "c"),
    );
    let disk = ContentHasher::new(Arc::new(DiskFilesystem::new(temp.path())));
    let expected = crate::util::hash::hash_directory(&temp.path().join("d"), &[]).unwrap();

    assert_eq!(memory.hash(Path::new("d")).unwrap(), expected);
    assert_eq!(disk.hash(Path::new("d")).unwrap(), expected);
  }

  #[test]
  fn cached_hash_survives_content_change_until_invalidated() {
    let fs = Arc::new(MemoryFilesystem::default().with_file("src/a.c", "v1"));
    let h = ContentHasher::new(fs.clone());
    let before_dir = h.hash(Path::new("src")).unwrap();
    let before = h.hash(Path::new("src/a.c")).unwrap();

    fs.write(Path::new("src/a.c"), b"v2").unwrap();
    assert_eq!(h.hash(Path::new("src/a.c")).unwrap(), before);

    h.invalidate(Path::new("src/a.c"));
    assert_ne!(h.hash(Path::new("src/a.c")).unwrap(), before);
    assert_ne!(h.hash(Path::new("src")).unwrap(), before_dir);
  }

  #[test]
  fn missing_path_reports_absolute_path() {
    let h = hasher(MemoryFilesystem::default());
    match h.hash(Path::new("nope.c")) {
      Err(HashError::Io { path, .. }) => assert_eq!(path, PathBuf::from("/project/nope.c")),
      other => panic!("expected io error, got {other:?}"),
    }
  }
}
