//! Packing a rule's output directory into an artifact payload and back.
//!
//! Entries are written in path order with zeroed mtime, uid and gid, so the
//! same tree always packs to the same bytes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};
use walkdir::WalkDir;

use super::types::{Artifact, CacheError};

/// Gzipped tar of everything under `dir`, paths relative to `dir`.
pub fn pack_output(dir: &Path) -> Result<Vec<u8>, CacheError> {
  let pack_err = |source: io::Error| CacheError::Pack {
    path: dir.to_path_buf(),
    source,
  };

  let mut builder = Builder::new(Vec::new());
  builder.follow_symlinks(false);
  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(|e| pack_err(e.into()))?;
    let path = entry.path();
    if path == dir {
      continue;
    }
    let rel = path
      .strip_prefix(dir)
      .map_err(|e| pack_err(io::Error::other(e)))?
      .to_string_lossy()
      .replace('\\', "/");
    let metadata = fs::symlink_metadata(path).map_err(pack_err)?;
    let file_type = metadata.file_type();

    let mut header = Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    if file_type.is_dir() {
      header.set_entry_type(EntryType::Directory);
      header.set_mode(0o755);
      header.set_size(0);
      builder.append_data(&mut header, &rel, io::empty()).map_err(pack_err)?;
    } else if file_type.is_file() {
      header.set_entry_type(EntryType::Regular);
      header.set_mode(if is_executable(&metadata) { 0o755 } else { 0o644 });
      header.set_size(metadata.len());
      let file = File::open(path).map_err(pack_err)?;
      builder.append_data(&mut header, &rel, file).map_err(pack_err)?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(path).map_err(pack_err)?;
      header.set_entry_type(EntryType::Symlink);
      header.set_mode(0o777);
      header.set_size(0);
      builder.append_link(&mut header, &rel, &link).map_err(pack_err)?;
    }
  }

  let tar_bytes = builder.into_inner().map_err(pack_err)?;
  let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
  encoder.write_all(&tar_bytes).map_err(pack_err)?;
  encoder.finish().map_err(pack_err)
}

/// Replace the contents of `dir` with the artifact's tree.
pub fn unpack_artifact(artifact: &Artifact, dir: &Path) -> Result<(), CacheError> {
  let unpack_err = |source| CacheError::Unpack {
    path: dir.to_path_buf(),
    source,
  };
  if dir.exists() {
    fs::remove_dir_all(dir).map_err(unpack_err)?;
  }
  fs::create_dir_all(dir).map_err(unpack_err)?;

  let mut archive = Archive::new(GzDecoder::new(artifact.payload.as_slice()));
  archive.set_preserve_mtime(false);
  archive.unpack(dir).map_err(unpack_err)
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
  false
}
