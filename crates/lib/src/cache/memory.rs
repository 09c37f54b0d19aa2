use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::types::{Artifact, ArtifactCache, CacheError, CacheMode};
use crate::rulekey::RuleKey;

/// In-process cache tier. Also the cache used by tests.
#[derive(Debug)]
pub struct MemoryArtifactCache {
  name: String,
  mode: CacheMode,
  entries: DashMap<RuleKey, Artifact>,
  fetches: AtomicUsize,
  stores: AtomicUsize,
}

impl MemoryArtifactCache {
  pub fn new(name: impl Into<String>, mode: CacheMode) -> Self {
    Self {
      name: name.into(),
      mode,
      entries: DashMap::new(),
      fetches: AtomicUsize::new(0),
      stores: AtomicUsize::new(0),
    }
  }

  pub fn contains(&self, key: &RuleKey) -> bool {
    self.entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Number of `fetch` calls served, hits and misses alike.
  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::Relaxed)
  }

  pub fn store_count(&self) -> usize {
    self.stores.load(Ordering::Relaxed)
  }
}

impl Default for MemoryArtifactCache {
  fn default() -> Self {
    Self::new("memory", CacheMode::ReadWrite)
  }
}

impl ArtifactCache for MemoryArtifactCache {
  fn name(&self) -> &str {
    &self.name
  }

  fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
    self.fetches.fetch_add(1, Ordering::Relaxed);
    if !self.mode.can_read() {
      return Ok(None);
    }
    Ok(self.entries.get(key).map(|a| a.value().clone()))
  }

  fn store(&self, key: &RuleKey, artifact: &Artifact) -> Result<(), CacheError> {
    if !self.mode.can_write() {
      return Err(CacheError::ReadOnly { name: self.name.clone() });
    }
    self.stores.fetch_add(1, Ordering::Relaxed);
    self.entries.insert(*key, artifact.clone());
    Ok(())
  }

  fn is_writable(&self) -> bool {
    self.mode.can_write()
  }
}
