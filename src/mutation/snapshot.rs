//! Pre-mutation copies of the entries a mutation touches.

use std::collections::HashMap;

use crate::cache::{CacheEntry, CacheKey, CacheStore};

/// Entries as they were right before an optimistic write.
///
/// Consumed exactly once: [`MutationSnapshot::restore`] on failure or
/// [`MutationSnapshot::discard`] on success. Both take `self` by value.
#[derive(Debug)]
pub struct MutationSnapshot {
  prior: Vec<(CacheKey, Option<CacheEntry>)>,
}

impl MutationSnapshot {
  /// Copy the current entries for `keys`. Duplicate keys are captured once.
  pub(crate) fn capture(entries: &HashMap<CacheKey, CacheEntry>, keys: &[CacheKey]) -> Self {
    let mut prior: Vec<(CacheKey, Option<CacheEntry>)> = Vec::with_capacity(keys.len());
    for key in keys {
      if prior.iter().any(|(k, _)| k == key) {
        continue;
      }
      prior.push((key.clone(), entries.get(key).cloned()));
    }
    Self { prior }
  }

  pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
    self.prior.iter().map(|(key, _)| key)
  }

  pub(crate) fn iter(&self) -> impl Iterator<Item = (&CacheKey, Option<&CacheEntry>)> {
    self.prior.iter().map(|(key, entry)| (key, entry.as_ref()))
  }

  pub fn len(&self) -> usize {
    self.prior.len()
  }

  pub fn is_empty(&self) -> bool {
    self.prior.is_empty()
  }

  /// Put every entry back as captured. Keys that had no entry are removed
  /// again.
  ///
  /// A captured `Loading` status is only kept while `is_fetching` still
  /// reports the key; otherwise the captured value comes back as `Success`.
  /// Call with fetches held so none can finish during the restore.
  pub(crate) fn restore(self, store: &CacheStore, is_fetching: &dyn Fn(&CacheKey) -> bool) {
    store.transact(|entries| {
      for (key, prior) in self.prior {
        let restored = match prior {
          Some(entry) if !is_fetching(&key) => entry.into_settled(),
          other => other,
        };
        match restored {
          Some(entry) => {
            entries.insert(key, entry);
          }
          None => {
            entries.remove(&key);
          }
        }
      }
    });
  }

  /// Drop the copies. Returns each key with whether the mutation created it.
  pub(crate) fn discard(self) -> Vec<(CacheKey, bool)> {
    self
      .prior
      .into_iter()
      .map(|(key, prior)| (key, prior.is_none()))
      .collect()
  }
}
