//! Query cache over the SQLite store

use std::sync::Arc;

use dashsync_core::{CacheStore, ManualClock, QueryConfig};
use dashsync_query::{QueryCache, QueryOptions};
use dashsync_storage::{Database, SqliteCacheStore};
use parking_lot::Mutex;
use tempfile::TempDir;
use tests::CountingFetcher;

fn sqlite_cache(path: &std::path::Path, clock: &ManualClock) -> QueryCache {
    let db = Database::open(path).expect("open database");
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(Arc::new(Mutex::new(db))));
    QueryCache::builder(QueryConfig::default())
        .with_store(store)
        .with_clock(Arc::new(clock.clone()))
        .build()
}

#[tokio::test]
async fn test_fresh_entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.db");
    let clock = ManualClock::default();

    {
        let cache = sqlite_cache(&path, &clock);
        let fetcher = CountingFetcher::ok(vec!["alpha".to_string()]);
        cache
            .fetch::<Vec<String>, _, _>("servers", fetcher.fetcher(), QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    let cache = sqlite_cache(&path, &clock);
    let fetcher = CountingFetcher::ok(vec!["other".to_string()]);
    let data = cache
        .fetch::<Vec<String>, _, _>("servers", fetcher.fetcher(), QueryOptions::new())
        .await
        .unwrap();

    assert_eq!(data, vec!["alpha".to_string()]);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_invalidate_and_sweep_on_sqlite() {
    let clock = ManualClock::default();
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::in_memory().unwrap());
    let config = QueryConfig {
        retention_ms: 1_000,
        ..QueryConfig::default()
    };
    let cache = QueryCache::builder(config)
        .with_store(store)
        .with_clock(Arc::new(clock.clone()))
        .build();

    cache.set_query_data("tickets?guildId=g1&page=0", &1u32).unwrap();
    cache.set_query_data("tickets?guildId=g1&page=1", &2u32).unwrap();
    cache.set_query_data("servers", &3u32).unwrap();

    assert_eq!(cache.invalidate("tickets?guildId=g1"), 2);
    assert_eq!(cache.len(), 1);

    clock.advance(std::time::Duration::from_secs(2));
    assert_eq!(cache.sweep(), 1);
    assert!(cache.is_empty());
}
