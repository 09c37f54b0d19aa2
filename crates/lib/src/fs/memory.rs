use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use dashmap::{DashMap, DashSet};

use super::{FsError, ProjectFilesystem};

/// In-memory [`ProjectFilesystem`] for tests and dry runs.
///
/// Writing a file implicitly creates its parent directories.
#[derive(Debug)]
pub struct MemoryFilesystem {
  root: PathBuf,
  files: DashMap<PathBuf, Vec<u8>>,
  dirs: DashSet<PathBuf>,
}

impl MemoryFilesystem {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    let dirs = DashSet::new();
    dirs.insert(root.clone());
    Self {
      root,
      files: DashMap::new(),
      dirs,
    }
  }

  /// Builder-style helper for fixtures.
  pub fn with_file(self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Self {
    let path = self.resolve(path.as_ref());
    self.insert_file(path, contents.as_ref().to_vec());
    self
  }

  pub fn remove(&self, path: &Path) {
    let path = self.resolve(path);
    self.files.remove(&path);
    self.dirs.remove(&path);
  }

  fn insert_file(&self, path: PathBuf, contents: Vec<u8>) {
    self.add_ancestors(&path);
    self.files.insert(path, contents);
  }

  fn add_ancestors(&self, path: &Path) {
    for ancestor in path.ancestors().skip(1) {
      if !self.dirs.insert(ancestor.to_path_buf()) {
        break;
      }
    }
  }
}

impl Default for MemoryFilesystem {
  fn default() -> Self {
    Self::new("/project")
  }
}

impl ProjectFilesystem for MemoryFilesystem {
  fn root(&self) -> &Path {
    &self.root
  }

  fn exists(&self, path: &Path) -> bool {
    let path = self.resolve(path);
    self.files.contains_key(&path) || self.dirs.contains(&path)
  }

  fn is_dir(&self, path: &Path) -> bool {
    self.dirs.contains(&self.resolve(path))
  }

  fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
    let path = self.resolve(path);
    match self.files.get(&path) {
      Some(contents) => Ok(contents.clone()),
      None => Err(FsError::not_found(path)),
    }
  }

  fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
    Ok(Box::new(Cursor::new(self.read(path)?)))
  }

  fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
    let dir = self.resolve(path);
    if !self.dirs.contains(&dir) {
      return Err(FsError::not_found(dir));
    }
    let child_name = |p: &Path| {
      (p.parent() == Some(dir.as_path()))
        .then(|| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .flatten()
    };
    let mut names: Vec<String> = self
      .files
      .iter()
      .filter_map(|e| child_name(e.key()))
      .chain(self.dirs.iter().filter_map(|d| child_name(d.key())))
      .collect();
    names.sort();
    names.dedup();
    Ok(names)
  }

  fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
    self.insert_file(self.resolve(path), contents.to_vec());
    Ok(())
  }

  fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
    let path = self.resolve(path);
    self.add_ancestors(&path);
    self.dirs.insert(path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn files_create_parent_directories() {
    let fs = MemoryFilesystem::default().with_file("a/b/c.txt", "c");
    assert!(fs.is_dir(Path::new("a")));
    assert!(fs.is_dir(Path::new("/project/a/b")));
    assert!(!fs.is_dir(Path::new("a/b/c.txt")));
    assert_eq!(fs.read_dir(Path::new("a")).unwrap(), vec!["b".to_string()]);
  }

  #[test]
  fn read_dir_lists_sorted_children() {
    let fs = MemoryFilesystem::default()
      .with_file("src/z.c", "")
      .with_file("src/a.c", "")
      .with_file("src/inner/m.c", "");
    assert_eq!(
      fs.read_dir(Path::new("src")).unwrap(),
      vec!["a.c".to_string(), "inner".to_string(), "z.c".to_string()]
    );
  }

  #[test]
  fn open_streams_contents() {
    let fs = MemoryFilesystem::default().with_file("x", "hello");
    let mut buf = String::new();
    fs.open(Path::new("x")).unwrap().read_to_string(&mut buf).unwrap();
    assert_eq!(buf, "hello");
    assert!(fs.read(Path::new("y")).unwrap_err().is_not_found());
  }
}
