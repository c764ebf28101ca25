//! Persistent storage for last-known-good query results.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::key::CacheKey;

/// A query result read back from storage.
#[derive(Debug, Clone)]
pub struct PersistedEntry {
  pub key: CacheKey,
  pub value: Value,
  /// When the value was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Load every stored entry.
  fn load_all(&self) -> Result<Vec<PersistedEntry>>;

  /// Store (or replace) the value for a key.
  fn store(&self, key: &CacheKey, value: &Value) -> Result<()>;

  /// Delete the value for a key.
  fn remove(&self, key: &CacheKey) -> Result<()>;

  /// Delete everything.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't persist anything.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load_all(&self) -> Result<Vec<PersistedEntry>> {
    Ok(Vec::new())
  }

  fn store(&self, _key: &CacheKey, _value: &Value) -> Result<()> {
    Ok(())
  }

  fn remove(&self, _key: &CacheKey) -> Result<()> {
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the storage at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("opsdash").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    key_hash TEXT PRIMARY KEY,
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_query_cache_namespace ON query_cache(namespace);
"#;

impl CacheStorage for SqliteStorage {
  fn load_all(&self) -> Result<Vec<PersistedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT cache_key, data, cached_at FROM query_cache ORDER BY namespace")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query cache: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for (key_text, data, cached_at) in rows {
      // Rows written by an incompatible version are skipped, not fatal.
      let Ok(key) = CacheKey::from_canonical(&key_text) else {
        continue;
      };
      let Ok(value) = serde_json::from_slice::<Value>(&data) else {
        continue;
      };
      entries.push(PersistedEntry {
        key,
        value,
        cached_at: parse_datetime(&cached_at)?,
      });
    }

    Ok(entries)
  }

  fn store(&self, key: &CacheKey, value: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let data = serde_json::to_vec(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache (key_hash, namespace, cache_key, data, cached_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![key.fingerprint(), key.namespace(), key.canonical(), data],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &CacheKey) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM query_cache WHERE key_hash = ?",
        params![key.fingerprint()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
