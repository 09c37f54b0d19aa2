//! Ordered stack of cache tiers, e.g. memory in front of a local directory.

use std::sync::Arc;

use tracing::{debug, warn};

use super::types::{Artifact, ArtifactCache, CacheError};
use crate::rulekey::RuleKey;

/// Where a hit came from.
#[derive(Debug, Clone)]
pub struct CacheHit {
  pub artifact: Artifact,
  pub source: String,
}

/// Consults tiers in order. A failing tier is logged and skipped, so the
/// tiered cache itself never fails.
#[derive(Debug, Default, Clone)]
pub struct TieredArtifactCache {
  tiers: Vec<Arc<dyn ArtifactCache>>,
}

impl TieredArtifactCache {
  pub fn new(tiers: Vec<Arc<dyn ArtifactCache>>) -> Self {
    Self { tiers }
  }

  pub fn with_tier(mut self, tier: Arc<dyn ArtifactCache>) -> Self {
    self.tiers.push(tier);
    self
  }

  pub fn tiers(&self) -> &[Arc<dyn ArtifactCache>] {
    &self.tiers
  }

  pub fn is_empty(&self) -> bool {
    self.tiers.is_empty()
  }

  /// First hit across tiers, written through to earlier writable tiers.
  pub fn fetch_hit(&self, key: &RuleKey) -> Option<CacheHit> {
    for (idx, tier) in self.tiers.iter().enumerate() {
      match tier.fetch(key) {
        Ok(Some(artifact)) => {
          debug!(cache = tier.name(), key = %key, "cache hit");
          for earlier in self.tiers[..idx].iter().filter(|t| t.is_writable()) {
            if let Err(e) = earlier.store(key, &artifact) {
              warn!(cache = earlier.name(), key = %key, error = %e, "cache write-through failed");
            }
          }
          return Some(CacheHit {
            artifact,
            source: tier.name().to_string(),
          });
        }
        Ok(None) => {}
        Err(e) => warn!(cache = tier.name(), key = %key, error = %e, "cache fetch failed, treating as miss"),
      }
    }
    None
  }

  /// Store into every writable tier. Returns how many accepted it.
  pub fn store_all(&self, key: &RuleKey, artifact: &Artifact) -> usize {
    let mut stored = 0;
    for tier in self.tiers.iter().filter(|t| t.is_writable()) {
      match tier.store(key, artifact) {
        Ok(()) => stored += 1,
        Err(e) => warn!(cache = tier.name(), key = %key, error = %e, "cache store failed"),
      }
    }
    stored
  }
}

impl ArtifactCache for TieredArtifactCache {
  fn name(&self) -> &str {
    "tiered"
  }

  fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
    Ok(self.fetch_hit(key).map(|hit| hit.artifact))
  }

  fn store(&self, key: &RuleKey, artifact: &Artifact) -> Result<(), CacheError> {
    self.store_all(key, artifact);
    Ok(())
  }

  fn is_writable(&self) -> bool {
    self.tiers.iter().any(|t| t.is_writable())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheMode, MemoryArtifactCache};
  use crate::util::hash::hash_bytes;
  use tracing_test::traced_test;

  #[derive(Debug)]
  struct BrokenCache;

  impl ArtifactCache for BrokenCache {
    fn name(&self) -> &str {
      "broken"
    }

    fn fetch(&self, key: &RuleKey) -> Result<Option<Artifact>, CacheError> {
      Err(CacheError::Corrupt {
        key: *key,
        reason: "disk on fire".to_string(),
      })
    }

    fn store(&self, key: &RuleKey, _artifact: &Artifact) -> Result<(), CacheError> {
      Err(CacheError::Corrupt {
        key: *key,
        reason: "disk on fire".to_string(),
      })
    }

    fn is_writable(&self) -> bool {
      true
    }
  }

  fn key() -> RuleKey {
    RuleKey::from_bytes([3; 32])
  }

  fn artifact() -> Artifact {
    Artifact::new(key(), "//:a", hash_bytes(b"out"), b"tgz".to_vec())
  }

  #[test]
  fn hit_in_later_tier_writes_through() {
    let front = Arc::new(MemoryArtifactCache::new("front", CacheMode::ReadWrite));
    let back = Arc::new(MemoryArtifactCache::new("back", CacheMode::ReadWrite));
    back.store(&key(), &artifact()).unwrap();

    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![front.clone(), back.clone()];
    let tiered = TieredArtifactCache::new(tiers);
    let hit = tiered.fetch_hit(&key()).unwrap();
    assert_eq!(hit.source, "back");
    assert!(front.contains(&key()));
  }

  #[test]
  fn read_only_tiers_are_not_written_through() {
    let front = Arc::new(MemoryArtifactCache::new("front", CacheMode::ReadOnly));
    let back = Arc::new(MemoryArtifactCache::new("back", CacheMode::ReadWrite));
    back.store(&key(), &artifact()).unwrap();

    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![front.clone(), back];
    let tiered = TieredArtifactCache::new(tiers);
    assert!(tiered.fetch_hit(&key()).is_some());
    assert!(!front.contains(&key()));
  }

  #[test]
  #[traced_test]
  fn failing_tier_is_a_miss() {
    let back = Arc::new(MemoryArtifactCache::default());
    back.store(&key(), &artifact()).unwrap();
    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![Arc::new(BrokenCache), back];
    let tiered = TieredArtifactCache::new(tiers);

    let hit = tiered.fetch_hit(&key()).unwrap();
    assert_eq!(hit.source, "memory");
    assert!(logs_contain("cache fetch failed, treating as miss"));
    assert!(logs_contain("cache write-through failed"));
  }

  #[test]
  #[traced_test]
  fn store_reaches_every_writable_tier() {
    let a = Arc::new(MemoryArtifactCache::new("a", CacheMode::ReadWrite));
    let b = Arc::new(MemoryArtifactCache::new("b", CacheMode::ReadOnly));
    let c = Arc::new(MemoryArtifactCache::new("c", CacheMode::ReadWrite));
    let tiers: Vec<Arc<dyn ArtifactCache>> = vec![a.clone(), Arc::new(BrokenCache), b.clone(), c.clone()];
    let tiered = TieredArtifactCache::new(tiers);

    assert_eq!(tiered.store_all(&key(), &artifact()), 2);
    assert!(a.contains(&key()));
    assert!(!b.contains(&key()));
    assert!(c.contains(&key()));
    assert!(logs_contain("cache store failed"));
  }
}
