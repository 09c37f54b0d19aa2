use std::sync::Arc;

use dashmap::DashMap;

use super::BuildTarget;

/// Hands out one shared allocation per distinct target.
///
/// Interned targets can be compared with `Arc::ptr_eq` before falling back
/// to structural equality.
#[derive(Debug, Default)]
pub struct TargetInterner {
  targets: DashMap<Arc<BuildTarget>, ()>,
}

impl TargetInterner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn intern(&self, target: BuildTarget) -> Arc<BuildTarget> {
    if let Some(existing) = self.targets.get(&target) {
      return Arc::clone(existing.key());
    }
    let entry = self.targets.entry(Arc::new(target)).or_insert(());
    Arc::clone(entry.key())
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn equal_targets_share_an_allocation() {
    let interner = TargetInterner::new();
    let a = interner.intern(BuildTarget::parse("//a:b", None).unwrap());
    let b = interner.intern(BuildTarget::parse("//a:b", None).unwrap());
    let c = interner.intern(BuildTarget::parse("//a:c", None).unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(interner.len(), 2);
  }
}
