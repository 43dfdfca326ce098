//! Keep-alive tests

use std::time::Duration;

use dashsync_core::{ConnectionState, OutboundMessage};
use serde_json::json;
use tests::{settle, ConnectionManagerTestHarness, MockTransport};

const INTERVAL: Duration = Duration::from_millis(100);
const TIMEOUT: Duration = Duration::from_millis(250);

#[tokio::test(start_paused = true)]
async fn test_pings_are_sent_on_interval() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::with_heartbeat(transport.clone(), INTERVAL, TIMEOUT);
    harness.connect().await;

    tokio::time::sleep(Duration::from_millis(210)).await;
    let pings = transport
        .remote()
        .sent()
        .into_iter()
        .filter(|m| *m == OutboundMessage::Ping)
        .count();
    assert_eq!(pings, 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_channel_is_declared_lost() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::with_heartbeat(transport.clone(), INTERVAL, TIMEOUT);
    harness.connect().await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(harness.manager.state(), ConnectionState::Errored);
    assert_eq!(
        harness.manager.stats().last_error.as_deref(),
        Some("heartbeat timeout")
    );
    assert_eq!(harness.scheduled_delays(), vec![Duration::from_millis(1000)]);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_the_channel_alive() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::with_heartbeat(transport.clone(), INTERVAL, TIMEOUT);
    harness.connect().await;
    let remote = transport.remote();

    for _ in 0..10 {
        tokio::time::sleep(INTERVAL).await;
        assert!(remote.pong());
    }
    settle().await;

    assert_eq!(harness.manager.state(), ConnectionState::Connected);
    assert_eq!(transport.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_count_as_liveness() {
    let transport = MockTransport::accepting();
    let harness = ConnectionManagerTestHarness::with_heartbeat(transport.clone(), INTERVAL, TIMEOUT);
    harness.connect().await;
    let remote = transport.remote();

    for id in 0..10 {
        tokio::time::sleep(INTERVAL).await;
        assert!(remote.push_event("ticket_updated", json!({ "id": id })));
    }
    settle().await;

    assert_eq!(harness.manager.state(), ConnectionState::Connected);
}
