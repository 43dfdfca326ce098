//! Cache storage contracts
//!
//! The query cache keeps its entries behind [`CacheStore`] so persistence is a
//! pluggable backend (in-memory here, SQLite in `dashsync-storage`) rather than
//! a second, parallel cache.

mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryCacheStore;

/// Result type for storage operations
pub type StoreResult<T> = anyhow::Result<T>;

/// A cached query result
///
/// Replaced wholesale on every completed fetch; only `last_accessed` is
/// refreshed in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            data,
            fetched_at: now,
            last_accessed: now,
        }
    }

    /// Age since the data was fetched
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, stale_time: std::time::Duration) -> bool {
        match chrono::Duration::from_std(stale_time) {
            Ok(stale_time) => self.age(now) < stale_time,
            Err(_) => true,
        }
    }

    pub fn idle_since(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_accessed
    }
}

/// Key-value storage for cache entries
///
/// All operations are synchronous: cache reads and writes never suspend.
pub trait CacheStore: Send + Sync {
    /// Get an entry by key
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Insert or replace an entry
    fn put(&self, key: &str, entry: CacheEntry) -> StoreResult<()>;

    /// Refresh `last_accessed` of an entry, if present
    fn touch(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove an entry; returns whether it existed
    fn remove(&self, key: &str) -> StoreResult<bool>;

    /// All stored keys
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Remove every entry whose key contains `pattern`; returns the removed keys
    fn remove_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut removed = Vec::new();
        for key in self.keys()? {
            if key.contains(pattern) && self.remove(&key)? {
                removed.push(key);
            }
        }
        Ok(removed)
    }

    /// Remove every entry last accessed before `cutoff`; returns the removed keys
    fn remove_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut removed = Vec::new();
        for key in self.keys()? {
            if let Some(entry) = self.get(&key)? {
                if entry.last_accessed < cutoff && self.remove(&key)? {
                    removed.push(key);
                }
            }
        }
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.keys()?.len())
    }

    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
