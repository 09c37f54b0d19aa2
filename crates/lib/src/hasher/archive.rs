use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;
use zip::result::ZipError;

use super::HashError;
use crate::consts::ARCHIVE_MEMBER_SEPARATOR;

/// A file inside a zip archive, written `archive.zip!/path/in/archive`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArchiveMemberPath {
  pub archive: PathBuf,
  pub member: PathBuf,
}

impl ArchiveMemberPath {
  pub fn new(archive: impl Into<PathBuf>, member: impl Into<PathBuf>) -> Self {
    Self {
      archive: archive.into(),
      member: member.into(),
    }
  }

  pub fn parse(text: &str) -> Option<Self> {
    let (archive, member) = text.split_once(ARCHIVE_MEMBER_SEPARATOR)?;
    if archive.is_empty() || member.is_empty() {
      return None;
    }
    Some(Self::new(archive, member))
  }

  /// Zip entry names always use `/`.
  fn entry_name(&self) -> String {
    slash_path(&self.member)
  }
}

impl fmt::Display for ArchiveMemberPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}{}{}",
      slash_path(&self.archive),
      ARCHIVE_MEMBER_SEPARATOR,
      slash_path(&self.member)
    )
  }
}

fn slash_path(path: &Path) -> String {
  path.to_string_lossy().replace('\\', "/")
}

pub(super) fn read_member(archive: &Path, bytes: &[u8], member: &Path) -> Result<Vec<u8>, HashError> {
  let invalid = |e: ZipError| HashError::InvalidArchive {
    path: archive.to_path_buf(),
    message: e.to_string(),
  };
  let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(invalid)?;
  let name = ArchiveMemberPath::new(archive, member).entry_name();

  let mut entry = match zip.by_name(&name) {
    Ok(entry) => entry,
    Err(ZipError::FileNotFound) => {
      return Err(HashError::InvalidArchiveMember {
        archive: archive.to_path_buf(),
        member: member.to_path_buf(),
      });
    }
    Err(e) => return Err(invalid(e)),
  };

  let mut contents = Vec::new();
  entry.read_to_end(&mut contents).map_err(|source| HashError::Io {
    path: archive.to_path_buf(),
    source,
  })?;
  Ok(contents)
}

#[cfg(test)]
mod tests {
  use std::io::Write;
  use std::sync::Arc;

  use super::*;
  use crate::fs::MemoryFilesystem;
  use crate::hasher::ContentHasher;
  use crate::util::hash::hash_bytes;

  fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
      zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, contents) in entries {
      writer.start_file(*name, options).unwrap();
      writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
  }

  #[test]
  fn parse_splits_on_separator() {
    let path = ArchiveMemberPath::parse("libs/dep.zip!/com/A.class").unwrap();
    assert_eq!(path.archive, PathBuf::from("libs/dep.zip"));
    assert_eq!(path.member, PathBuf::from("com/A.class"));
    assert_eq!(path.to_string(), "libs/dep.zip!/com/A.class");
    assert!(ArchiveMemberPath::parse("libs/dep.zip").is_none());
  }

  #[test]
  fn member_hash_is_hash_of_member_bytes() {
    let fs = MemoryFilesystem::default().with_file("dep.zip", zip_with(&[("a/b.txt", "inner")]));
    let hasher = ContentHasher::new(Arc::new(fs));
    let hash = hasher
      .hash_archive_member(&ArchiveMemberPath::new("dep.zip", "a/b.txt"))
      .unwrap();
    assert_eq!(hash, hash_bytes(b"inner"));
  }

  #[test]
  fn missing_member_is_an_invalid_member_error() {
    let fs = MemoryFilesystem::default().with_file("dep.zip", zip_with(&[("a.txt", "x")]));
    let hasher = ContentHasher::new(Arc::new(fs));
    let err = hasher
      .hash_archive_member(&ArchiveMemberPath::new("dep.zip", "missing.txt"))
      .unwrap_err();
    assert!(matches!(err, HashError::InvalidArchiveMember { .. }));
  }

  #[test]
  fn non_zip_archive_is_rejected() {
    let fs = MemoryFilesystem::default().with_file("dep.zip", "not a zip");
    let hasher = ContentHasher::new(Arc::new(fs));
    let err = hasher
      .hash_archive_member(&ArchiveMemberPath::new("dep.zip", "a.txt"))
      .unwrap_err();
    assert!(matches!(err, HashError::InvalidArchive { .. }));
  }
}
