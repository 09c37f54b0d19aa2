use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use cachet_lib::fs::DiskFilesystem;
use cachet_lib::hasher::{ArchiveMemberPath, ContentHasher};

use super::ProjectArgs;

pub fn cmd_hash(project: &ProjectArgs, paths: &[String]) -> Result<()> {
  let hasher = ContentHasher::new(Arc::new(DiskFilesystem::new(project.project_root()?)));
  for path in paths {
    let hash = match ArchiveMemberPath::parse(path) {
      Some(member) => hasher.hash_archive_member(&member),
      None => hasher.hash(Path::new(path)),
    }
    .with_context(|| format!("Failed to hash {}", path))?;
    println!("{}  {}", hash, path);
  }
  Ok(())
}
