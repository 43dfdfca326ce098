//! In-memory cache store (the default backend)

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{CacheEntry, CacheStore, StoreResult};

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, entry: CacheEntry) -> StoreResult<()> {
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    fn touch(&self, key: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.last_accessed = at;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn remove_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.write();
        let removed: Vec<String> = entries
            .keys()
            .filter(|key| key.contains(pattern))
            .cloned()
            .collect();
        for key in &removed {
            entries.remove(key);
        }
        Ok(removed)
    }

    fn remove_idle(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.write();
        let removed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.last_accessed < cutoff)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            entries.remove(key);
        }
        Ok(removed)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().len())
    }
}
