//! Push events - messages flowing over the push channel
//!
//! Inbound messages are decoded into [`PushEvent`]s and fanned out through the
//! event bus by their type tag. Outbound messages are the control frames the
//! client sends back (room joins/leaves, pass-through emits, heartbeats).
//!
//! # Design Principles
//!
//! - **Type tag routing**: consumers subscribe by `event_type`, never by payload shape
//! - **Opaque payloads**: payloads stay `serde_json::Value` until a consumer decodes them
//! - **Immutable**: events are facts that happened, never mutated

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// WELL-KNOWN EVENT TYPES
// ============================================================================

pub const TICKET_CREATED: &str = "ticket_created";
pub const TICKET_UPDATED: &str = "ticket_updated";
pub const TICKET_CLOSED: &str = "ticket_closed";
pub const WARNING_ISSUED: &str = "warning_issued";
pub const WARNING_REMOVED: &str = "warning_removed";
pub const ACTIVITY_LOG: &str = "activity_log";
pub const INTEGRATION_EVENT: &str = "integration_event";
pub const INTEGRATION_ERROR: &str = "integration_error";

// ============================================================================
// INBOUND
// ============================================================================

/// A decoded inbound message from the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Type tag used for routing (e.g. `ticket_created`)
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary JSON payload
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Room (guild) the event was scoped to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl PushEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            room: None,
        }
    }

    pub fn in_room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Decode the payload into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

// ============================================================================
// OUTBOUND
// ============================================================================

/// A control message sent from the client to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Subscribe to a room's events
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Stop receiving a room's events
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// Pass-through emit of an application event
    #[serde(skip)]
    Emit {
        event_type: String,
        data: serde_json::Value,
    },
    /// Heartbeat probe
    Ping,
}

impl OutboundMessage {
    pub fn type_name(&self) -> &str {
        match self {
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::Emit { event_type, .. } => event_type,
            Self::Ping => "ping",
        }
    }
}
