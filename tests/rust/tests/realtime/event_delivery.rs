//! Inbound event delivery through the manager onto the bus

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashsync_core::event::{ACTIVITY_LOG, TICKET_CREATED};
use dashsync_core::PushEvent;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tests::events::EventCollector;
use tests::{settle, ConnectionManagerTestHarness, MockTransport};

#[tokio::test(start_paused = true)]
async fn test_events_reach_subscribers_in_order() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _sub = harness.manager.subscribe(
        TICKET_CREATED,
        Arc::new(move |payload: &Value| sink.lock().push(payload["id"].clone())),
    );

    harness.connect().await;
    let remote = transport.remote();
    for id in 1..=3 {
        remote.push_event(TICKET_CREATED, json!({ "id": id }));
    }
    settle().await;

    assert_eq!(*received.lock(), vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_room_scoped_subscribers_only_see_their_room() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let in_room = Arc::new(AtomicUsize::new(0));
    let anywhere = Arc::new(AtomicUsize::new(0));

    let in_room_clone = in_room.clone();
    let _room_sub = harness.bus.subscribe_in_room(
        "guild-1",
        ACTIVITY_LOG,
        Arc::new(move |_: &Value| {
            in_room_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let anywhere_clone = anywhere.clone();
    let _sub = harness.bus.subscribe(
        ACTIVITY_LOG,
        Arc::new(move |_: &Value| {
            anywhere_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );

    harness.connect().await;
    let remote = transport.remote();
    remote.push(PushEvent::new(ACTIVITY_LOG, json!({})).in_room("guild-1"));
    remote.push(PushEvent::new(ACTIVITY_LOG, json!({})).in_room("guild-2"));
    remote.push(PushEvent::new(ACTIVITY_LOG, json!({})));
    settle().await;

    assert_eq!(in_room.load(Ordering::SeqCst), 1);
    assert_eq!(anywhere.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_subscriber_is_isolated() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let collector = EventCollector::attach(&harness.bus);
    let _bad = harness.bus.subscribe(
        TICKET_CREATED,
        Arc::new(|_: &Value| panic!("subscriber bug")),
    );

    harness.connect().await;
    let remote = transport.remote();
    remote.push_event(TICKET_CREATED, json!({"id": 1}));
    remote.push_event(TICKET_CREATED, json!({"id": 2}));
    settle().await;

    assert_eq!(collector.len(), 2);
    assert!(harness.manager.is_connected());
    assert!(remote.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_listener_stops_receiving() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let sub = harness.bus.subscribe(
        TICKET_CREATED,
        Arc::new(move |_: &Value| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );

    harness.connect().await;
    let remote = transport.remote();
    remote.push_event(TICKET_CREATED, json!({}));
    settle().await;
    sub.unsubscribe();
    remote.push_event(TICKET_CREATED, json!({}));
    settle().await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(harness.bus.listener_count(TICKET_CREATED), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bus_receiver_sees_forwarded_events_with_their_room() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::new(transport.clone());
    let mut receiver = harness.bus.receiver();

    harness.connect().await;
    let remote = transport.remote();
    remote.push(PushEvent::new(ACTIVITY_LOG, json!({ "id": 7 })).in_room("guild-1"));
    remote.push_event(TICKET_CREATED, json!({ "id": 8 }));

    let first = receiver.recv().await.expect("activity event");
    assert_eq!(first.event_type, ACTIVITY_LOG);
    assert_eq!(first.room.as_deref(), Some("guild-1"));
    assert_eq!(first.payload, json!({ "id": 7 }));

    let second = receiver.recv().await.expect("ticket event");
    assert_eq!(second.event_type, TICKET_CREATED);
    assert_eq!(second.room, None);
    assert!(receiver.try_recv().is_none());
}
