//! Notification adapter
//!
//! Catch-all bus consumer that turns well-known push events into
//! user-facing [`Notification`]s. Unknown event types are ignored.

use std::sync::Arc;

use dashsync_core::event::{
    INTEGRATION_ERROR, TICKET_CLOSED, TICKET_CREATED, TICKET_UPDATED, WARNING_ISSUED,
    WARNING_REMOVED,
};
use dashsync_core::{EventBus, Notification, NotificationLevel, Subscription};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Destination for produced notifications
pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(Notification) + Send + Sync + 'static,
{
    fn deliver(&self, notification: Notification) {
        self(notification)
    }
}

impl NotificationSink for mpsc::UnboundedSender<Notification> {
    fn deliver(&self, notification: Notification) {
        if self.send(notification).is_err() {
            debug!("[NotificationAdapter] Receiver dropped, notification discarded");
        }
    }
}

pub struct NotificationAdapter;

impl NotificationAdapter {
    /// Start translating every event published on `bus` into `sink`
    pub fn attach(bus: &EventBus, sink: Arc<dyn NotificationSink>) -> Subscription {
        bus.subscribe_all(Arc::new(move |event_type: &str, payload: &Value| {
            match translate(event_type, payload) {
                Some(notification) => {
                    trace!(event_type, "[NotificationAdapter] Delivering notification");
                    sink.deliver(notification);
                }
                None => trace!(event_type, "[NotificationAdapter] No notification for event"),
            }
        }))
    }

    /// Convenience: attach with a channel sink and return its receiver
    pub fn channel(bus: &EventBus) -> (Subscription, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::attach(bus, Arc::new(tx)), rx)
    }
}

/// Map an event to a notification, `None` for event types nobody is told about
pub fn translate(event_type: &str, payload: &Value) -> Option<Notification> {
    let (level, title, message) = match event_type {
        TICKET_CREATED => (
            NotificationLevel::Info,
            "New ticket",
            describe(payload, "Ticket", &["subject", "title"]),
        ),
        TICKET_UPDATED => (
            NotificationLevel::Info,
            "Ticket updated",
            describe(payload, "Ticket", &["subject", "title"]),
        ),
        TICKET_CLOSED => (
            NotificationLevel::Success,
            "Ticket closed",
            describe(payload, "Ticket", &["subject", "title"]),
        ),
        WARNING_ISSUED => (
            NotificationLevel::Warning,
            "Warning issued",
            describe(payload, "Warning", &["reason"]),
        ),
        WARNING_REMOVED => (
            NotificationLevel::Info,
            "Warning removed",
            describe(payload, "Warning", &["reason"]),
        ),
        INTEGRATION_ERROR => (
            NotificationLevel::Error,
            "Integration error",
            text_field(payload, &["message", "error"])
                .unwrap_or_else(|| "An integration reported an error".to_string()),
        ),
        _ => return None,
    };
    Some(Notification::new(level, title, message, event_type))
}

fn describe(payload: &Value, noun: &str, keys: &[&str]) -> String {
    let id = payload.get("id").and_then(|id| match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    });
    match (id, text_field(payload, keys)) {
        (Some(id), Some(text)) => format!("{} #{}: {}", noun, id, text),
        (Some(id), None) => format!("{} #{}", noun, id),
        (None, Some(text)) => text,
        (None, None) => noun.to_string(),
    }
}

fn text_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
