//! SQLite implementation of CacheStore.
//!
//! Cache entries survive restarts; timestamps are stored as epoch
//! milliseconds so idle eviction is a single indexed DELETE.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashsync_core::{CacheEntry, CacheStore, StoreResult};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::Database;

/// SQLite-backed cache store.
///
/// The query cache never awaits storage, so access goes through a blocking
/// `parking_lot` mutex rather than an async one.
pub struct SqliteCacheStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteCacheStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Convenience constructor over an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Mutex::new(Database::open_in_memory()?))))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| anyhow!("Timestamp out of range: {}", ms))
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        let db = self.db.lock();
        let row = db
            .connection()
            .query_row(
                "SELECT data, fetched_at, last_accessed FROM cache_entries WHERE key = ?",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((data, fetched_at, last_accessed)) = row else {
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            data: serde_json::from_str(&data)
                .with_context(|| format!("Corrupt cache entry for key '{}'", key))?,
            fetched_at: from_millis(fetched_at)?,
            last_accessed: from_millis(last_accessed)?,
        }))
    }

    fn put(&self, key: &str, entry: CacheEntry) -> StoreResult<()> {
        let data = serde_json::to_string(&entry.data)?;
        let db = self.db.lock();
        db.connection().execute(
            "INSERT INTO cache_entries (key, data, fetched_at, last_accessed)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                data = excluded.data,
                fetched_at = excluded.fetched_at,
                last_accessed = excluded.last_accessed",
            params![
                key,
                data,
                to_millis(entry.fetched_at),
                to_millis(entry.last_accessed)
            ],
        )?;
        Ok(())
    }

    fn touch(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let db = self.db.lock();
        db.connection().execute(
            "UPDATE cache_entries SET last_accessed = ?1 WHERE key = ?2",
            params![to_millis(at), key],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let db = self.db.lock();
        let removed = db
            .connection()
            .execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
        Ok(removed > 0)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let db = self.db.lock();
        let mut stmt = db
            .connection()
            .prepare("SELECT key FROM cache_entries ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn remove_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let db = self.db.lock();
        // instr() rather than LIKE: patterns are plain substrings
        let removed = db.transaction(|conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM cache_entries WHERE instr(key, ?1) > 0")?;
            let keys = stmt
                .query_map(params![pattern], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            conn.execute(
                "DELETE FROM cache_entries WHERE instr(key, ?1) > 0",
                params![pattern],
            )?;
            Ok(keys)
        })?;
        debug!(pattern, count = removed.len(), "[SqliteCacheStore] Removed matching entries");
        Ok(removed)
    }

    fn remove_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let db = self.db.lock();
        let cutoff = to_millis(cutoff);
        let removed = db.transaction(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM cache_entries WHERE last_accessed < ?1")?;
            let keys = stmt
                .query_map(params![cutoff], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            conn.execute(
                "DELETE FROM cache_entries WHERE last_accessed < ?1",
                params![cutoff],
            )?;
            Ok(keys)
        })?;
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        let db = self.db.lock();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
