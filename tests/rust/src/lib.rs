//! Shared test utilities for Dashsync integration tests
//!
//! This crate provides:
//! - Mock transports and fetchers (`mocks`)
//! - A connection manager harness that records every callback (`services`)
//! - Activity log fixtures (`fixtures`)
//! - Event collection helpers (`events`)

pub mod mocks;
pub mod services;

pub use mocks::*;
pub use services::*;

use std::time::Duration;

/// Let spawned tasks run to quiescence
///
/// Under a paused clock this advances time by one millisecond, which is far
/// below any backoff or heartbeat used by the tests.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Route `tracing` output to the test writer (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Activity log fixtures
pub mod fixtures {
    use chrono::{TimeZone, Utc};
    use dashsync_core::ActivityLogEntry;

    pub const GUILD: &str = "guild-1";

    /// Entry `id` in [`GUILD`], created `secs` seconds after the epoch
    pub fn activity(id: i64, secs: i64, action: &str) -> ActivityLogEntry {
        ActivityLogEntry::new(id, GUILD, action, Utc.timestamp_opt(secs, 0).unwrap())
    }

    pub fn activity_json(id: i64, secs: i64, action: &str) -> serde_json::Value {
        serde_json::to_value(activity(id, secs, action)).unwrap()
    }

    pub fn ids(entries: &[ActivityLogEntry]) -> Vec<i64> {
        entries.iter().map(|e| e.id).collect()
    }
}

/// Event collection helpers
pub mod events {
    use std::sync::Arc;

    use dashsync_core::{EventBus, Subscription};
    use parking_lot::Mutex;
    use serde_json::Value;

    /// Records every event published on a bus, in delivery order
    pub struct EventCollector {
        events: Arc<Mutex<Vec<(String, Value)>>>,
        _subscription: Subscription,
    }

    impl EventCollector {
        pub fn attach(bus: &EventBus) -> Self {
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            let subscription = bus.subscribe_all(Arc::new(move |event_type: &str, payload: &Value| {
                sink.lock().push((event_type.to_string(), payload.clone()));
            }));
            Self {
                events,
                _subscription: subscription,
            }
        }

        pub fn events(&self) -> Vec<(String, Value)> {
            self.events.lock().clone()
        }

        pub fn types(&self) -> Vec<String> {
            self.events.lock().iter().map(|(t, _)| t.clone()).collect()
        }

        pub fn len(&self) -> usize {
            self.events.lock().len()
        }

        pub fn is_empty(&self) -> bool {
            self.events.lock().is_empty()
        }
    }
}
