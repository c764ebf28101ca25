//! In-memory cache store with write-through persistence.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::key::CacheKey;
use super::storage::{CacheStorage, NoopStorage};

/// Process-wide map from [`CacheKey`] to [`CacheEntry`].
///
/// Reads hand out clones. Writes are crate-private: only the query executor
/// and the mutation coordinator change entries. The lock is never held across
/// an `.await`.
pub struct CacheStore {
  entries: Mutex<HashMap<CacheKey, CacheEntry>>,
  storage: Arc<dyn CacheStorage>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::with_storage(Arc::new(NoopStorage))
  }

  pub fn with_storage(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      storage,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
    // Entries are replaced whole, so a panic elsewhere cannot leave one half-written.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.entries().get(key).cloned()
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.entries().contains_key(key)
  }

  pub fn keys(&self) -> Vec<CacheKey> {
    let mut keys: Vec<CacheKey> = self.entries().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  /// Mark every entry under `prefix` as stale. Values are kept so they can be
  /// shown while revalidating. Returns the affected keys.
  pub fn invalidate(&self, prefix: &CacheKey) -> Vec<CacheKey> {
    let mut entries = self.entries();
    let mut touched = Vec::new();
    for (key, entry) in entries.iter_mut() {
      if key.starts_with(prefix) {
        entry.mark_invalidated();
        touched.push(key.clone());
      }
    }
    debug!(prefix = %prefix, count = touched.len(), "invalidated cache entries");
    touched
  }

  /// Mark only `key` as stale. Returns whether an entry existed.
  pub fn invalidate_key(&self, key: &CacheKey) -> bool {
    match self.entries().get_mut(key) {
      Some(entry) => {
        entry.mark_invalidated();
        true
      }
      None => false,
    }
  }

  /// Replace the whole entry. Last writer wins.
  pub(crate) fn set(&self, key: CacheKey, entry: CacheEntry) {
    self.entries().insert(key, entry);
  }

  /// Delete an entry, including its persisted copy.
  pub(crate) fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
    let removed = self.entries().remove(key);
    if let Err(e) = self.storage.remove(key) {
      warn!(key = %key, error = %e, "failed to remove persisted cache entry");
    }
    removed
  }

  /// Read-modify-write of a single entry under one lock.
  ///
  /// Returning `None` from `f` removes the entry from memory.
  pub(crate) fn update<F>(&self, key: &CacheKey, f: F)
  where
    F: FnOnce(Option<CacheEntry>) -> Option<CacheEntry>,
  {
    let mut entries = self.entries();
    let current = entries.remove(key);
    if let Some(next) = f(current) {
      entries.insert(key.clone(), next);
    }
  }

  /// Run `f` with exclusive access to every entry, for multi-key edits that
  /// must not interleave with other writers.
  pub(crate) fn transact<R>(&self, f: impl FnOnce(&mut HashMap<CacheKey, CacheEntry>) -> R) -> R {
    f(&mut self.entries())
  }

  /// Write a confirmed server value through to persistent storage.
  pub(crate) fn persist(&self, key: &CacheKey, value: &Value) {
    if let Err(e) = self.storage.store(key, value) {
      warn!(key = %key, error = %e, "failed to persist cache entry");
    }
  }

  /// Load persisted values as invalidated entries.
  pub(crate) fn hydrate(&self, stale_after: Duration) -> usize {
    let persisted = match self.storage.load_all() {
      Ok(persisted) => persisted,
      Err(e) => {
        warn!(error = %e, "failed to load persisted cache");
        return 0;
      }
    };

    let mut entries = self.entries();
    let count = persisted.len();
    for item in persisted {
      debug!(key = %item.key, cached_at = %item.cached_at, "hydrated cache entry");
      entries.insert(item.key, CacheEntry::hydrated(item.value, stale_after));
    }
    count
  }

  /// Drop all in-memory entries. Persisted data is left alone.
  pub(crate) fn clear_memory(&self) {
    self.entries().clear();
  }

  /// Drop all entries, in memory and persisted.
  pub(crate) fn clear(&self) {
    self.clear_memory();
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "failed to clear persisted cache");
    }
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::entry::QueryStatus;
  use crate::cache::storage::SqliteStorage;
  use serde_json::json;

  fn entry(value: Value) -> CacheEntry {
    CacheEntry::success(value, Duration::from_secs(60))
  }

  #[tokio::test]
  async fn test_invalidate_keeps_values() {
    let store = CacheStore::new();
    let list = CacheKey::new("tickets").segment("list");
    let detail = CacheKey::new("tickets").segment("detail").segment("t1");
    let users = CacheKey::new("users").segment("list");
    store.set(list.clone(), entry(json!([1])));
    store.set(detail.clone(), entry(json!({"id": "t1"})));
    store.set(users.clone(), entry(json!([])));

    let touched = store.invalidate(&CacheKey::new("tickets"));
    assert_eq!(touched.len(), 2);

    let list_entry = store.get(&list).unwrap();
    assert!(list_entry.is_invalidated());
    assert_eq!(list_entry.value(), Some(&json!([1])));
    assert_eq!(list_entry.status(), QueryStatus::Success);
    assert!(!store.get(&users).unwrap().is_invalidated());
  }

  #[tokio::test]
  async fn test_invalidate_key_is_exact() {
    let store = CacheStore::new();
    let parent = CacheKey::new("tickets");
    let child = CacheKey::new("tickets").segment("list");
    store.set(parent.clone(), entry(json!(1)));
    store.set(child.clone(), entry(json!([])));

    assert!(store.invalidate_key(&parent));
    assert!(store.get(&parent).unwrap().is_invalidated());
    assert!(!store.get(&child).unwrap().is_invalidated());
    assert!(!store.invalidate_key(&CacheKey::new("missing")));
  }

  #[tokio::test]
  async fn test_set_is_last_writer_wins() {
    let store = CacheStore::new();
    let key = CacheKey::new("users").id(7);
    store.set(key.clone(), entry(json!({"v": 1})));
    store.set(key.clone(), entry(json!({"v": 2})));
    assert_eq!(store.get(&key).unwrap().value(), Some(&json!({"v": 2})));
    assert_eq!(store.len(), 1);
  }

  #[tokio::test]
  async fn test_remove() {
    let store = CacheStore::new();
    let key = CacheKey::new("users").id(7);
    store.set(key.clone(), entry(json!({})));
    assert!(store.remove(&key).is_some());
    assert!(store.get(&key).is_none());
    assert!(store.remove(&key).is_none());
  }

  #[tokio::test]
  async fn test_hydrate_from_storage() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap());
    let key = CacheKey::new("alliances").segment("list");

    let first = CacheStore::with_storage(storage.clone());
    first.persist(&key, &json!([{"id": 1}]));

    let second = CacheStore::with_storage(storage);
    assert_eq!(second.hydrate(Duration::from_secs(60)), 1);
    let restored = second.get(&key).unwrap();
    assert_eq!(restored.value(), Some(&json!([{"id": 1}])));
    assert!(restored.is_invalidated());
  }
}
