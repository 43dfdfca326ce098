//! A dashboard session: live activity feed, ticket list and notifications

use std::sync::Arc;
use std::time::Duration;

use dashsync_core::event::{ACTIVITY_LOG, TICKET_CLOSED, TICKET_CREATED};
use dashsync_core::{ActivityFilter, ConnectionState, NotificationLevel, PushEvent, QueryConfig};
use dashsync_query::{ActivityFeed, ActivityFeedOptions, QueryCache, QueryOptions};
use dashsync_realtime::NotificationAdapter;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tests::fixtures::{activity, activity_json, ids, GUILD};
use tests::{init_tracing, settle, ConnectionManagerTestHarness, CountingFetcher, MockTransport};

#[tokio::test(start_paused = true)]
async fn test_live_activity_merges_with_fetched_page() {
    init_tracing();
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let cache = QueryCache::new(QueryConfig::default());
    let feed = ActivityFeed::new(
        cache,
        &harness.bus,
        ActivityFilter::for_guild(GUILD),
        |_filter, _page, _size| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, anyhow::Error>(vec![
                activity(42, 420, "member_ban"),
                activity(41, 410, "member_kick"),
            ])
        },
        ActivityFeedOptions::default(),
    );

    harness.connect().await;
    assert!(harness.manager.join_room(GUILD));

    let remote = transport.remote();
    let (refreshed, _) = tokio::join!(feed.refresh(), async {
        // Push lands while the first page is still loading
        for (id, secs, action) in [(42, 420, "member_ban"), (43, 430, "role_update")] {
            remote.push(PushEvent::new(ACTIVITY_LOG, activity_json(id, secs, action)).in_room(GUILD));
        }
        settle().await;
    });
    refreshed.unwrap();

    assert_eq!(ids(&feed.items()), vec![43, 42, 41]);
}

#[tokio::test(start_paused = true)]
async fn test_ticket_events_invalidate_ticket_queries() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let cache = QueryCache::new(QueryConfig::default());
    let fetcher = CountingFetcher::ok(vec![1u32, 2]);

    let invalidating = cache.clone();
    let _sub = harness.bus.subscribe_all(Arc::new(move |event_type: &str, _: &Value| {
        if event_type.starts_with("ticket_") {
            invalidating.invalidate("tickets");
        }
    }));

    let key = "tickets?guildId=guild-1";
    cache
        .fetch::<Vec<u32>, _, _>(key, fetcher.fetcher(), QueryOptions::new())
        .await
        .unwrap();
    cache
        .fetch::<Vec<u32>, _, _>(key, fetcher.fetcher(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 1);

    harness.connect().await;
    transport.remote().push_event(TICKET_CREATED, json!({"id": 3}));
    settle().await;
    assert!(cache.entry(key).is_none());

    cache
        .fetch::<Vec<u32>, _, _>(key, fetcher.fetcher(), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_events_become_notifications() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let (_subscription, mut notifications) = NotificationAdapter::channel(&harness.bus);

    harness.connect().await;
    let remote = transport.remote();
    remote.push_event(ACTIVITY_LOG, activity_json(1, 10, "member_ban"));
    remote.push_event(TICKET_CLOSED, json!({"id": 12, "subject": "Refund"}));
    settle().await;

    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.level, NotificationLevel::Success);
    assert_eq!(notification.message, "Ticket #12: Refund");
    assert!(notifications.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_feed_keeps_working_across_reconnect() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let feed = ActivityFeed::new(
        QueryCache::new(QueryConfig::default()),
        &harness.bus,
        ActivityFilter::for_guild(GUILD),
        |_filter, _page, _size| async { Ok::<_, anyhow::Error>(Vec::new()) },
        ActivityFeedOptions::default(),
    );

    harness.connect().await;
    transport.remote().close("deploy");
    settle().await;
    assert_eq!(harness.manager.state(), ConnectionState::Errored);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    settle().await;
    assert_eq!(harness.manager.state(), ConnectionState::Connected);

    transport
        .remote()
        .push_event(ACTIVITY_LOG, activity_json(5, 50, "channel_delete"));
    settle().await;
    assert_eq!(ids(&feed.items()), vec![5]);
}
