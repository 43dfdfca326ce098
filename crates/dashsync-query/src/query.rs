//! Reactive query handle

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{decode, QueryCache, QueryOptions, SharedFetch, ValueFetcher};
use crate::error::{QueryError, QueryResult};

/// Snapshot of a query
///
/// A failed refetch keeps the last good `data` next to the `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<QueryError>,
    /// When `data` was fetched
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            updated_at: None,
        }
    }
}

impl<T> QueryState<T> {
    pub fn is_success(&self) -> bool {
        self.data.is_some() && self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Handle on one cache key
///
/// Created by [`QueryCache::query`]. Clones observe the same state.
pub struct Query<T> {
    cache: QueryCache,
    key: String,
    fetcher: ValueFetcher,
    options: QueryOptions,
    state: Arc<watch::Sender<QueryState<T>>>,
    pending: Arc<AtomicUsize>,
    _data: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
            fetcher: self.fetcher.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            pending: self.pending.clone(),
            _data: PhantomData,
        }
    }
}

impl<T> Query<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn start(
        cache: QueryCache,
        key: String,
        fetcher: ValueFetcher,
        options: QueryOptions,
    ) -> Self {
        let mut initial = QueryState::default();
        let mut fresh = false;

        if let Some(entry) = cache.entry(&key) {
            cache.touch(&key);
            match decode::<T>(&key, entry.data.clone()) {
                Ok(data) => {
                    fresh = entry.is_fresh(cache.now(), cache.stale_time(&options));
                    initial.data = Some(data);
                    initial.updated_at = Some(entry.fetched_at);
                }
                Err(e) => warn!(key = %key, "[Query] Ignoring cached data: {}", e),
            }
        }

        let (state, _) = watch::channel(initial);
        let query = Self {
            cache,
            key,
            fetcher,
            options,
            state: Arc::new(state),
            pending: Arc::new(AtomicUsize::new(0)),
            _data: PhantomData,
        };

        if fresh {
            debug!(key = %query.key, "[Query] Served from cache");
        } else {
            query.spawn_load(false);
        }
        query
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> QueryState<T> {
        self.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.state.subscribe()
    }

    /// Wait until no load of this handle is pending
    pub async fn settled(&self) -> QueryState<T> {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Fetch again, even if a fetch is already in flight
    pub async fn refetch(&self) -> QueryResult<T> {
        let pending = self.begin(true);
        let result = pending.await;
        self.finish(result)
    }

    /// Drop the cached entry and refetch in the background
    pub fn invalidate(&self) {
        self.cache.remove(&self.key);
        self.spawn_load(true);
    }

    fn begin(&self, force: bool) -> SharedFetch {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|state| state.loading = true);
        self.cache.start_fetch(
            &self.key,
            self.fetcher.clone(),
            self.cache.retry_policy(&self.options),
            force,
        )
    }

    fn spawn_load(&self, force: bool) {
        let pending = self.begin(force);
        let query = self.clone();
        tokio::spawn(async move {
            let result = pending.await;
            let _ = query.finish(result);
        });
    }

    fn finish(&self, result: QueryResult<Value>) -> QueryResult<T> {
        let decoded = result.and_then(|value| decode::<T>(&self.key, value));
        let still_pending = self.pending.fetch_sub(1, Ordering::SeqCst) > 1;
        let now = self.cache.now();

        match &decoded {
            Ok(data) => self.state.send_modify(|state| {
                state.data = Some(data.clone());
                state.error = None;
                state.updated_at = Some(now);
                state.loading = still_pending;
            }),
            Err(e) => self.state.send_modify(|state| {
                state.error = Some(e.clone());
                state.loading = still_pending;
            }),
        }
        decoded
    }
}
