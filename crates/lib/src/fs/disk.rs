use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{FsError, ProjectFilesystem};

/// [`ProjectFilesystem`] over the real disk.
#[derive(Debug, Clone)]
pub struct DiskFilesystem {
  root: PathBuf,
}

impl DiskFilesystem {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

impl ProjectFilesystem for DiskFilesystem {
  fn root(&self) -> &Path {
    &self.root
  }

  fn exists(&self, path: &Path) -> bool {
    self.resolve(path).exists()
  }

  fn is_dir(&self, path: &Path) -> bool {
    self.resolve(path).is_dir()
  }

  fn read(&self, path: &Path) -> Result<Vec<u8>, FsError> {
    let path = self.resolve(path);
    fs::read(&path).map_err(|e| FsError::io(path, e))
  }

  fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>, FsError> {
    let path = self.resolve(path);
    let file = fs::File::open(&path).map_err(|e| FsError::io(path, e))?;
    Ok(Box::new(std::io::BufReader::new(file)))
  }

  fn read_dir(&self, path: &Path) -> Result<Vec<String>, FsError> {
    let path = self.resolve(path);
    let mut names = Vec::new();
    for entry in fs::read_dir(&path).map_err(|e| FsError::io(&path, e))? {
      let entry = entry.map_err(|e| FsError::io(&path, e))?;
      names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
  }

  fn write(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
    let path = self.resolve(path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
    }
    fs::write(&path, contents).map_err(|e| FsError::io(path, e))
  }

  fn create_dir_all(&self, path: &Path) -> Result<(), FsError> {
    let path = self.resolve(path);
    fs::create_dir_all(&path).map_err(|e| FsError::io(path, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn relative_paths_resolve_against_root() {
    let temp = tempdir().unwrap();
    let fs = DiskFilesystem::new(temp.path());
    fs.write(Path::new("src/a.c"), b"int a;").unwrap();

    assert!(fs.exists(Path::new("src/a.c")));
    assert!(fs.is_dir(Path::new("src")));
    assert_eq!(fs.read(&temp.path().join("src/a.c")).unwrap(), b"int a;");
    assert_eq!(fs.read_dir(Path::new("src")).unwrap(), vec!["a.c".to_string()]);
    assert_eq!(
      fs.relativize(&temp.path().join("src/a.c")),
      Some(PathBuf::from("src/a.c"))
    );
  }

  #[test]
  fn missing_file_error_carries_absolute_path() {
    let temp = tempdir().unwrap();
    let fs = DiskFilesystem::new(temp.path());
    let err = fs.read(Path::new("missing.txt")).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.path(), temp.path().join("missing.txt"));
  }
}
