//! QueryCache - keyed fetch cache with single-flight deduplication
//!
//! Results are stored as JSON in a [`CacheStore`] together with the time they
//! were fetched and last read:
//! - A read within `stale_time` of the fetch is served from the store.
//! - Concurrent fetches of one key share one spawned task (`futures::Shared`),
//!   so the fetcher runs once and every waiter gets the same result.
//! - Failed attempts are retried with exponential backoff before the error is
//!   surfaced.
//! - `invalidate(pattern)` drops every key containing `pattern`; `sweep()`
//!   drops entries nobody read within the retention window.
//!
//! Fetch tasks are never cancelled: a fetch superseded by `refetch()` or an
//! invalidation still writes its result when it completes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashsync_core::{CacheEntry, CacheStore, Clock, MemoryCacheStore, QueryConfig, SystemClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{QueryError, QueryResult};
use crate::query::Query;
use crate::retry::RetryPolicy;

/// Type-erased fetcher producing JSON
pub(crate) type ValueFetcher =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, QueryResult<Value>>>;

/// Smallest sweep period accepted by [`QueryCache::spawn_sweeper`]
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

struct InFlight {
    generation: u64,
    future: SharedFetch,
}

/// Per-call overrides of the cache defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub stale_time: Option<Duration>,
    pub retry: Option<RetryPolicy>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn no_retry(self) -> Self {
        self.with_retry(RetryPolicy::none())
    }
}

pub struct QueryCacheBuilder {
    config: QueryConfig,
    store: Option<Arc<dyn CacheStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl QueryCacheBuilder {
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> QueryCache {
        QueryCache {
            inner: Arc::new(Inner {
                config: self.config,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryCacheStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

struct Inner {
    config: QueryConfig,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    generation: AtomicU64,
}

/// Client-side query cache
///
/// Cheaply cloneable; clones share entries and in-flight requests.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    /// In-memory cache on the system clock
    pub fn new(config: QueryConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: QueryConfig) -> QueryCacheBuilder {
        QueryCacheBuilder {
            config,
            store: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Fetch `key`, serving a fresh cached value when there is one
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: QueryOptions,
    ) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let fetcher = erase(fetcher);
        let value = self.fetch_value(key, &fetcher, &options).await?;
        decode(key, value)
    }

    /// Reactive handle on `key`; starts a fetch unless a fresh entry exists
    pub fn query<T, F, Fut>(&self, key: &str, fetcher: F, options: QueryOptions) -> Query<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Query::start(self.clone(), key.to_string(), erase(fetcher), options)
    }

    pub(crate) async fn fetch_value(
        &self,
        key: &str,
        fetcher: &ValueFetcher,
        options: &QueryOptions,
    ) -> QueryResult<Value> {
        if let Some(value) = self.fresh_value(key, self.stale_time(options)) {
            trace!(key, "[QueryCache] Fresh hit");
            return Ok(value);
        }
        self.start_fetch(key, fetcher.clone(), self.retry_policy(options), false)
            .await
    }

    /// Join the in-flight fetch of `key`, or spawn one
    ///
    /// With `force` a new fetch is spawned even if one is in flight; later
    /// callers join the new one.
    pub(crate) fn start_fetch(
        &self,
        key: &str,
        fetcher: ValueFetcher,
        retry: RetryPolicy,
        force: bool,
    ) -> SharedFetch {
        let mut in_flight = self.inner.in_flight.lock();
        if !force {
            if let Some(existing) = in_flight.get(key) {
                debug!(key, "[QueryCache] Joining in-flight fetch");
                return existing.future.clone();
            }
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let handle =
            tokio::spawn(async move { inner.run_fetch(task_key, fetcher, retry, generation).await });

        let join_key = key.to_string();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(key = %join_key, "[QueryCache] Fetch task failed: {}", e);
                    Err(QueryError::Aborted { key: join_key })
                }
            }
        }
        .boxed()
        .shared();

        debug!(key, generation, force, "[QueryCache] Fetch started");
        in_flight.insert(
            key.to_string(),
            InFlight {
                generation,
                future: future.clone(),
            },
        );
        future
    }

    pub(crate) fn stale_time(&self, options: &QueryOptions) -> Duration {
        options
            .stale_time
            .unwrap_or_else(|| self.inner.config.stale_time())
    }

    pub(crate) fn retry_policy(&self, options: &QueryOptions) -> RetryPolicy {
        options
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.inner.config))
    }

    /// Whether a fetch of `key` is currently in flight
    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    // =========================================================================
    // Direct access
    // =========================================================================

    /// Stored entry without counting as an access
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        match self.inner.store.get(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, "[QueryCache] Failed to read entry: {:#}", e);
                None
            }
        }
    }

    pub(crate) fn touch(&self, key: &str) {
        if let Err(e) = self.inner.store.touch(key, self.now()) {
            warn!(key, "[QueryCache] Failed to refresh access time: {:#}", e);
        }
    }

    fn fresh_value(&self, key: &str, stale_time: Duration) -> Option<Value> {
        let entry = self.entry(key)?;
        if !entry.is_fresh(self.now(), stale_time) {
            return None;
        }
        self.touch(key);
        Some(entry.data)
    }

    /// Cached data for `key`, fresh or not
    pub fn get_query_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entry(key)?;
        self.touch(key);
        match decode(key, entry.data) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key, "[QueryCache] {}", e);
                None
            }
        }
    }

    /// Write `data` as if it had just been fetched
    pub fn set_query_data<T: Serialize>(&self, key: &str, data: &T) -> QueryResult<()> {
        let value = serde_json::to_value(data).map_err(|e| QueryError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.inner
            .store
            .put(key, CacheEntry::new(value, self.now()))
            .map_err(|e| QueryError::Storage(format!("{:#}", e)))?;
        debug!(key, "[QueryCache] Data set");
        Ok(())
    }

    /// Read-modify-write of the cached data for `key`
    pub fn update_query_data<T, F>(&self, key: &str, update: F) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.get_query_data::<T>(key);
        let next = update(current);
        self.set_query_data(key, &next)?;
        Ok(next)
    }

    /// Remove a single key; returns whether it was cached
    pub fn remove(&self, key: &str) -> bool {
        match self.inner.store.remove(key) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key, "[QueryCache] Failed to remove entry: {:#}", e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.store.len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Invalidation & eviction
    // =========================================================================

    /// Drop every entry whose key contains `pattern`
    ///
    /// In-flight fetches of matching keys stop being shared, so the next read
    /// starts a new fetch. Returns the number of removed entries.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let detached = {
            let mut in_flight = self.inner.in_flight.lock();
            let before = in_flight.len();
            in_flight.retain(|key, _| !key.contains(pattern));
            before - in_flight.len()
        };

        match self.inner.store.remove_matching(pattern) {
            Ok(removed) => {
                debug!(
                    pattern,
                    removed = removed.len(),
                    detached,
                    "[QueryCache] Invalidated"
                );
                removed.len()
            }
            Err(e) => {
                warn!(pattern, "[QueryCache] Invalidation failed: {:#}", e);
                0
            }
        }
    }

    /// Evict entries not read within the retention window
    pub fn sweep(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.inner.config.retention()) else {
            return 0;
        };
        let Some(cutoff) = self.now().checked_sub_signed(retention) else {
            return 0;
        };

        match self.inner.store.remove_idle(cutoff) {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!(count = removed.len(), "[QueryCache] Swept idle entries");
                }
                removed.len()
            }
            Err(e) => {
                warn!("[QueryCache] Sweep failed: {:#}", e);
                0
            }
        }
    }

    /// Run `sweep()` every `sweep_interval` until the cache is dropped
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval().max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("[QueryCache] Cache dropped, sweeper exiting");
                    break;
                };
                QueryCache { inner }.sweep();
            }
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Await a write and invalidate `patterns` when it succeeds
    ///
    /// Mutations are never retried.
    pub async fn mutate<R, Fut>(&self, operation: Fut, patterns: &[&str]) -> anyhow::Result<R>
    where
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let result = operation.await?;
        for pattern in patterns {
            self.invalidate(pattern);
        }
        Ok(result)
    }
}

impl Inner {
    async fn run_fetch(
        self: Arc<Self>,
        key: String,
        fetcher: ValueFetcher,
        retry: RetryPolicy,
        generation: u64,
    ) -> QueryResult<Value> {
        let result = fetch_with_retry(&key, &fetcher, retry).await;

        if let Ok(value) = &result {
            let entry = CacheEntry::new(value.clone(), self.clock.now());
            if let Err(e) = self.store.put(&key, entry) {
                warn!(key = %key, "[QueryCache] Failed to store result: {:#}", e);
            }
        }

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| current.generation == generation)
        {
            in_flight.remove(&key);
        }
        result
    }
}

async fn fetch_with_retry(
    key: &str,
    fetcher: &ValueFetcher,
    retry: RetryPolicy,
) -> QueryResult<Value> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fetcher().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(key, attempt, "[QueryCache] Fetch succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt > retry.retries => {
                warn!(key, attempts = attempt, "[QueryCache] Fetch failed: {:#}", e);
                return Err(QueryError::Fetch {
                    key: key.to_string(),
                    attempts: attempt,
                    message: format!("{:#}", e),
                });
            }
            Err(e) => {
                let delay = retry.delay_for(attempt - 1);
                debug!(
                    key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "[QueryCache] Fetch attempt failed, retrying: {:#}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub(crate) fn erase<T, F, Fut>(fetcher: F) -> ValueFetcher
where
    T: Serialize + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move || {
        let pending = fetcher();
        async move {
            let data = pending.await?;
            Ok(serde_json::to_value(data)?)
        }
        .boxed()
    })
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, value: Value) -> QueryResult<T> {
    serde_json::from_value(value).map_err(|e| QueryError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    })
}
