//! ActivityFeed - live activity log of a guild
//!
//! Binds a [`MergeView`] to the query cache (paged fetches keyed by filter and
//! page) and the event bus (`activity_log` pushes). Pushes and fetch results
//! land in the view as they arrive; every change is published on a watch
//! channel.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use dashsync_core::event::ACTIVITY_LOG;
use dashsync_core::{ActivityFilter, ActivityLogEntry, EventBus, Subscription};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{QueryCache, QueryOptions};
use crate::error::QueryResult;
use crate::key::query_key;
use crate::merge::{MergeSnapshot, MergeView, DEFAULT_MAX_PUSHED};

type PageFetcher = Arc<
    dyn Fn(ActivityFilter, u32, usize) -> BoxFuture<'static, anyhow::Result<Vec<ActivityLogEntry>>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone)]
pub struct ActivityFeedOptions {
    pub page_size: usize,
    pub max_pushed: usize,
    pub query: QueryOptions,
}

impl Default for ActivityFeedOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pushed: DEFAULT_MAX_PUSHED,
            query: QueryOptions::default(),
        }
    }
}

struct FeedState {
    view: MergeView<ActivityLogEntry>,
    filter: ActivityFilter,
    pages: BTreeMap<u32, Vec<ActivityLogEntry>>,
    /// Bumped on filter change so results for an old filter are discarded
    generation: u64,
    /// Page loads in flight, across generations
    loads: usize,
}

impl FeedState {
    fn fetched(&self) -> Vec<ActivityLogEntry> {
        self.pages.values().flatten().cloned().collect()
    }
}

pub struct ActivityFeed {
    cache: QueryCache,
    fetcher: PageFetcher,
    options: ActivityFeedOptions,
    state: Arc<Mutex<FeedState>>,
    snapshots: Arc<watch::Sender<MergeSnapshot<ActivityLogEntry>>>,
    subscription: Subscription,
}

impl ActivityFeed {
    /// Subscribe to pushes on `bus`; call [`refresh`](Self::refresh) to load
    ///
    /// `fetcher(filter, page, page_size)` returns one page, newest first.
    pub fn new<F, Fut>(
        cache: QueryCache,
        bus: &EventBus,
        filter: ActivityFilter,
        fetcher: F,
        options: ActivityFeedOptions,
    ) -> Self
    where
        F: Fn(ActivityFilter, u32, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<ActivityLogEntry>>> + Send + 'static,
    {
        let mut view = MergeView::new().with_max_pushed(options.max_pushed);
        view.set_filter(filter_fn(&filter));

        let state = Arc::new(Mutex::new(FeedState {
            view,
            filter,
            pages: BTreeMap::new(),
            generation: 0,
            loads: 0,
        }));
        let (snapshots, _) = watch::channel(MergeSnapshot::default());
        let snapshots = Arc::new(snapshots);

        let push_state = state.clone();
        let push_snapshots = snapshots.clone();
        let subscription = bus.subscribe(
            ACTIVITY_LOG,
            Arc::new(move |payload: &Value| {
                let entry: ActivityLogEntry = match serde_json::from_value(payload.clone()) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("[ActivityFeed] Dropping malformed activity push: {}", e);
                        return;
                    }
                };
                let mut state = push_state.lock();
                if state.view.push(entry) {
                    push_snapshots.send_replace(state.view.snapshot());
                }
            }),
        );

        let fetcher: PageFetcher = Arc::new(move |filter, page, page_size| {
            fetcher(filter, page, page_size).boxed()
        });

        Self {
            cache,
            fetcher,
            options,
            state,
            snapshots,
            subscription,
        }
    }

    pub fn filter(&self) -> ActivityFilter {
        self.state.lock().filter.clone()
    }

    pub fn items(&self) -> Vec<ActivityLogEntry> {
        self.state.lock().view.items()
    }

    pub fn snapshot(&self) -> MergeSnapshot<ActivityLogEntry> {
        self.state.lock().view.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<MergeSnapshot<ActivityLogEntry>> {
        self.snapshots.subscribe()
    }

    /// Cache key of one page under the current filter
    pub fn page_key(&self, page: u32) -> String {
        let filter = self.filter();
        self.key_for(&filter, page)
    }

    fn key_for(&self, filter: &ActivityFilter, page: u32) -> String {
        let mut params = filter.params();
        params.push(("page".to_string(), page.to_string()));
        params.push(("limit".to_string(), self.options.page_size.to_string()));
        query_key(ACTIVITY_LOG, params)
    }

    /// Refetch every loaded page (at least the first), bypassing the cache
    pub async fn refresh(&self) -> QueryResult<()> {
        let (filter, pages) = {
            let state = self.state.lock();
            let mut pages: Vec<u32> = state.pages.keys().copied().collect();
            if pages.is_empty() {
                pages.push(0);
            }
            (state.filter.clone(), pages)
        };

        for page in &pages {
            self.cache.remove(&self.key_for(&filter, *page));
        }
        for page in pages {
            self.load_page(page).await?;
        }
        Ok(())
    }

    /// Fetch one page through the cache and merge it in
    pub async fn load_page(&self, page: u32) -> QueryResult<()> {
        let (filter, generation) = {
            let mut state = self.state.lock();
            state.loads += 1;
            state.view.set_loading(true);
            self.snapshots.send_replace(state.view.snapshot());
            (state.filter.clone(), state.generation)
        };

        let key = self.key_for(&filter, page);
        let fetcher = self.fetcher.clone();
        let page_size = self.options.page_size;
        let fetch_filter = filter.clone();
        let result = self
            .cache
            .fetch(
                &key,
                move || fetcher(fetch_filter.clone(), page, page_size),
                self.options.query.clone(),
            )
            .await;

        let mut state = self.state.lock();
        state.loads = state.loads.saturating_sub(1);
        let still_loading = state.loads > 0;
        state.view.set_loading(still_loading);
        if state.generation != generation {
            debug!(key = %key, "[ActivityFeed] Discarding page for a previous filter");
            self.snapshots.send_replace(state.view.snapshot());
            return Ok(());
        }
        let outcome = match result {
            Ok(entries) => {
                debug!(key = %key, count = entries.len(), "[ActivityFeed] Page loaded");
                state.pages.insert(page, entries);
                let fetched = state.fetched();
                state.view.set_fetched(fetched);
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, "[ActivityFeed] Page load failed: {}", e);
                state.view.set_error(e.clone());
                Err(e)
            }
        };
        self.snapshots.send_replace(state.view.snapshot());
        outcome
    }

    /// Load the page after the last loaded one
    pub async fn load_more(&self) -> QueryResult<()> {
        let next = self
            .state
            .lock()
            .pages
            .keys()
            .next_back()
            .map_or(0, |last| last + 1);
        self.load_page(next).await
    }

    /// Switch filter: drops pushed and fetched items, then loads the first page
    pub async fn set_filter(&self, filter: ActivityFilter) -> QueryResult<()> {
        {
            let mut state = self.state.lock();
            if state.filter == filter {
                return Ok(());
            }
            state.generation += 1;
            state.view.set_filter(filter_fn(&filter));
            state.view.reset();
            state.pages.clear();
            state.filter = filter;
            self.snapshots.send_replace(state.view.snapshot());
        }
        self.load_page(0).await
    }

    /// Stop receiving pushes
    pub fn close(&self) {
        self.subscription.unsubscribe();
    }
}

impl Drop for ActivityFeed {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

fn filter_fn(filter: &ActivityFilter) -> crate::merge::FilterFn<ActivityLogEntry> {
    let filter = filter.clone();
    Arc::new(move |entry: &ActivityLogEntry| filter.matches(entry))
}
