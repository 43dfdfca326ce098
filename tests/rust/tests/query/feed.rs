//! ActivityFeed wired to a live bus and cache

use std::sync::Arc;
use std::time::Duration;

use dashsync_core::event::ACTIVITY_LOG;
use dashsync_core::{ActivityFilter, ActivityLogEntry, EventBus, QueryConfig};
use dashsync_query::{ActivityFeed, ActivityFeedOptions, QueryCache, QueryError, QueryOptions};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tests::fixtures::{activity, activity_json, ids, GUILD};

type Pages = Arc<Mutex<Vec<Result<Vec<ActivityLogEntry>, String>>>>;

/// Feed whose pages are served from `pages` in call order (last one repeats)
fn feed(bus: &EventBus, cache: QueryCache, pages: Pages) -> ActivityFeed {
    ActivityFeed::new(
        cache,
        bus,
        ActivityFilter::for_guild(GUILD),
        move |_filter, _page, _size| {
            let pages = pages.clone();
            async move {
                let mut pages = pages.lock();
                let next = if pages.len() > 1 {
                    pages.remove(0)
                } else {
                    pages[0].clone()
                };
                next.map_err(|e| anyhow::anyhow!(e))
            }
        },
        ActivityFeedOptions {
            query: QueryOptions::new().no_retry(),
            ..ActivityFeedOptions::default()
        },
    )
}

#[tokio::test]
async fn test_push_racing_initial_fetch_is_shown_once() {
    let bus = EventBus::new();
    let pages: Pages = Arc::new(Mutex::new(vec![Ok(vec![
        activity(42, 420, "member_ban"),
        activity(41, 410, "member_kick"),
    ])]));
    let feed = feed(&bus, QueryCache::new(QueryConfig::default()), pages);

    bus.publish(ACTIVITY_LOG, &activity_json(42, 420, "member_ban"));
    feed.refresh().await.unwrap();

    assert_eq!(ids(&feed.items()), vec![42, 41]);
}

#[tokio::test]
async fn test_failed_refresh_keeps_items_and_reports_error() {
    let bus = EventBus::new();
    let pages: Pages = Arc::new(Mutex::new(vec![
        Ok(vec![activity(1, 100, "a")]),
        Err("gateway timeout".to_string()),
    ]));
    let feed = feed(&bus, QueryCache::new(QueryConfig::default()), pages);

    feed.refresh().await.unwrap();
    let result = feed.refresh().await;

    assert!(matches!(result, Err(QueryError::Fetch { .. })));
    let snapshot = feed.snapshot();
    assert_eq!(ids(&snapshot.items), vec![1]);
    assert!(snapshot.error.is_some());
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn test_watchers_see_pushes() {
    let bus = EventBus::new();
    let pages: Pages = Arc::new(Mutex::new(vec![Ok(Vec::new())]));
    let feed = feed(&bus, QueryCache::new(QueryConfig::default()), pages);
    let mut rx = feed.watch();

    bus.publish(ACTIVITY_LOG, &activity_json(7, 70, "channel_create"));

    tokio::time::timeout(Duration::from_secs(1), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids(&rx.borrow().items), vec![7]);
}

#[tokio::test]
async fn test_pages_are_cached_under_filter_keys() {
    let bus = EventBus::new();
    let cache = QueryCache::new(QueryConfig::default());
    let pages: Pages = Arc::new(Mutex::new(vec![Ok(vec![activity(1, 100, "a")])]));
    let feed = feed(&bus, cache.clone(), pages);

    feed.load_page(0).await.unwrap();

    let key = feed.page_key(0);
    assert_eq!(key, "activity_log?guildId=guild-1&limit=50&page=0");
    assert!(cache.entry(&key).is_some());

    // Invalidating the resource drops every page of every filter
    assert_eq!(cache.invalidate(ACTIVITY_LOG), 1);
}
