//! Project filesystem abstraction.
//!
//! Everything that reads source inputs goes through [`ProjectFilesystem`], so
//! hashing and rule-key computation can run against an in-memory tree in tests.
//! Paths handed to the trait may be relative (to [`ProjectFilesystem::root`])
//! or absolute.

mod disk;
mod memory;

use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use disk::DiskFilesystem;
pub use memory::MemoryFilesystem;

#[derive(Debug, Error)]
pub enum FsError {
  #[error("i/o error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl FsError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    FsError::Io {
      path: path.into(),
      source,
    }
  }

  pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
    FsError::io(path, std::io::Error::from(std::io::ErrorKind::NotFound))
  }

  pub fn path(&self) -> &Path {
    match self {
      FsError::Io { path, .. } => path,
    }
  }

  pub fn is_not_found(&self) -> bool {
    match self {
      FsError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
    }
  }
}

pub trait ProjectFilesystem: Send + Sync + std::fmt::Debug {
  /// Absolute project root.
  fn root(&self) -> &Path;

  fn exists(&self, path: &Path) -> bool;

  fn is_dir(&self, path: &Path) -> bool;

  /// Whole file contents.
  fn read(&self, path: &Path) -> Result<Vec<u8>, FsError>;

  /// Streaming reader over a file.
  fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError>;

  /// Names of the direct children of a directory, sorted.
  fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError>;

  fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError>;

  fn create_dir_all(&self, path: &Path) -> Result<(), FsError>;

  /// Absolute form of `path`.
  fn resolve(&self, path: &Path) -> PathBuf {
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.root().join(path)
    }
  }

  /// `path` relative to the root, or `None` if it lies outside the project.
  fn relativize(&self, path: &Path) -> Option<PathBuf> {
    self.resolve(path).strip_prefix(self.root()).ok().map(Path::to_path_buf)
  }
}
