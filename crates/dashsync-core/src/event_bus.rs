//! Event Bus - In-process fan-out of push events
//!
//! Every event decoded from the push channel is published here under its
//! type tag. Consumers register callbacks per event type (optionally scoped to
//! a room), or a catch-all callback that sees every event.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Event Bus                              │
//! │                                                                  │
//! │  Producers:                    Consumers:                        │
//! │  └─ ConnectionManager          ├─ ActivityFeed (→ merged view)   │
//! │     (decoded PushEvents)       ├─ NotificationAdapter (catch-all)│
//! │                                └─ EventReceiver (async streams)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is synchronous and in registration order. Within one event type,
//! delivery order equals publish order. A panicking callback is isolated and
//! logged; it never stops the remaining callbacks nor reaches the publisher.
//!
//! # Usage
//!
//! ```ignore
//! let bus = EventBus::new();
//!
//! let sub = bus.subscribe("ticket_created", Arc::new(|payload| {
//!     println!("new ticket: {}", payload);
//! }));
//!
//! bus.publish("ticket_created", &json!({"id": 42}));
//! sub.unsubscribe();
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::domain::PushEvent;
use crate::subscription::Subscription;

/// Default channel capacity for async receivers
const DEFAULT_CAPACITY: usize = 256;

/// Callback for a single event type
pub type EventCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Callback receiving every event with its type tag
pub type CatchAllCallback = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;

struct Listener {
    id: u64,
    room: Option<String>,
    callback: EventCallback,
}

#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    by_type: HashMap<String, Vec<Listener>>,
    catch_all: Vec<(u64, CatchAllCallback)>,
}

impl ListenerRegistry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, event_type: &str, id: u64) {
        if let Some(listeners) = self.by_type.get_mut(event_type) {
            listeners.retain(|l| l.id != id);
            if listeners.is_empty() {
                self.by_type.remove(event_type);
            }
        }
    }
}

/// Event Bus - Central hub for push event distribution
///
/// Cheaply cloneable; clones share the same listener registry.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<ListenerRegistry>>,
    sender: broadcast::Sender<PushEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom capacity for async receivers
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            registry: Arc::new(Mutex::new(ListenerRegistry::default())),
            sender,
        }
    }

    /// Subscribe to every event of `event_type`, regardless of room
    pub fn subscribe(&self, event_type: &str, callback: EventCallback) -> Subscription {
        self.register(event_type, None, callback)
    }

    /// Subscribe to events of `event_type` published in `room` only
    pub fn subscribe_in_room(
        &self,
        room: &str,
        event_type: &str,
        callback: EventCallback,
    ) -> Subscription {
        self.register(event_type, Some(room.to_string()), callback)
    }

    /// Subscribe to every event on the bus
    pub fn subscribe_all(&self, callback: CatchAllCallback) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            if let Some((id, _)) = registry
                .catch_all
                .iter()
                .find(|(_, existing)| Arc::ptr_eq(existing, &callback))
            {
                *id
            } else {
                let id = registry.next_id();
                registry.catch_all.push((id, callback));
                id
            }
        };

        let weak = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().catch_all.retain(|(existing, _)| *existing != id);
            }
        })
    }

    fn register(
        &self,
        event_type: &str,
        room: Option<String>,
        callback: EventCallback,
    ) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let existing = registry.by_type.get(event_type).and_then(|listeners| {
                listeners
                    .iter()
                    .find(|l| l.room == room && Arc::ptr_eq(&l.callback, &callback))
                    .map(|l| l.id)
            });

            match existing {
                Some(id) => {
                    debug!(event_type, "[EventBus] Callback already registered");
                    id
                }
                None => {
                    let id = registry.next_id();
                    registry
                        .by_type
                        .entry(event_type.to_string())
                        .or_default()
                        .push(Listener { id, room, callback });
                    id
                }
            }
        };

        let weak: Weak<Mutex<ListenerRegistry>> = Arc::downgrade(&self.registry);
        let event_type = event_type.to_string();
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().remove(&event_type, id);
            }
        })
    }

    /// Publish an unscoped event
    ///
    /// Returns the number of callbacks that ran to completion.
    pub fn publish(&self, event_type: &str, payload: &serde_json::Value) -> usize {
        let delivered = self.dispatch(event_type, payload, None);
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(PushEvent::new(event_type, payload.clone()));
        }
        delivered
    }

    /// Publish a decoded push event, honoring its room scope
    pub fn publish_event(&self, event: &PushEvent) -> usize {
        let delivered = self.dispatch(&event.event_type, &event.payload, event.room.as_deref());
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event.clone());
        }
        delivered
    }

    fn dispatch(&self, event_type: &str, payload: &serde_json::Value, room: Option<&str>) -> usize {
        // Snapshot so callbacks may (un)subscribe during this pass
        let (listeners, catch_all): (Vec<EventCallback>, Vec<CatchAllCallback>) = {
            let registry = self.registry.lock();
            let listeners = registry
                .by_type
                .get(event_type)
                .map(|listeners| {
                    listeners
                        .iter()
                        .filter(|l| match (&l.room, room) {
                            (None, _) => true,
                            (Some(wanted), Some(actual)) => wanted == actual,
                            (Some(_), None) => false,
                        })
                        .map(|l| l.callback.clone())
                        .collect()
                })
                .unwrap_or_default();
            let catch_all = registry.catch_all.iter().map(|(_, cb)| cb.clone()).collect();
            (listeners, catch_all)
        };

        let mut delivered = 0;
        for callback in listeners {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    event_type,
                    panic = %panic_message(&panic),
                    "[EventBus] Listener panicked"
                ),
            }
        }
        for callback in catch_all {
            match catch_unwind(AssertUnwindSafe(|| callback(event_type, payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    event_type,
                    panic = %panic_message(&panic),
                    "[EventBus] Catch-all listener panicked"
                ),
            }
        }

        if delivered == 0 {
            debug!(event_type, "[EventBus] No listeners for event");
        }
        delivered
    }

    /// Async receiver of every published [`PushEvent`]
    pub fn receiver(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    /// Number of callbacks registered for `event_type`
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.registry
            .lock()
            .by_type
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Whether any registry entry exists for `event_type`
    pub fn has_listeners(&self, event_type: &str) -> bool {
        self.registry.lock().by_type.contains_key(event_type)
    }

    /// Drop every registered callback
    pub fn clear(&self) {
        let mut registry = self.registry.lock();
        registry.by_type.clear();
        registry.catch_all.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Event Receiver - async consumption of bus traffic
///
/// Each receiver gets all events published after it was created.
pub struct EventReceiver {
    receiver: broadcast::Receiver<PushEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<PushEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event
    ///
    /// Returns `None` if the bus is gone. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<PushEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged, skipped {} events", skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Option<PushEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped_events = skipped, "[EventBus] Receiver lagged on try_recv");
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
