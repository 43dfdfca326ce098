//! JSON envelope used by the WebSocket transport
//!
//! Inbound:  `{"type": "ticket_created", "payload": {...}, "room": "guild-1"}`
//! Outbound: `{"type": "join_room", "roomId": "guild-1"}`, `{"type": "ping"}`,
//! and pass-through emits as `{"type": "<event>", "data": ...}`.

use dashsync_core::{OutboundMessage, PushEvent};
use serde_json::json;
use thiserror::Error;

/// Type tag of a heartbeat reply
const PONG: &str = "pong";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame has an empty type tag")]
    EmptyType,
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Event(PushEvent),
    Pong,
}

pub fn encode(message: &OutboundMessage) -> Result<String, CodecError> {
    let value = match message {
        OutboundMessage::Emit { event_type, data } => json!({
            "type": event_type,
            "data": data,
        }),
        other => serde_json::to_value(other)?,
    };
    Ok(value.to_string())
}

pub fn decode(text: &str) -> Result<InboundFrame, CodecError> {
    let event: PushEvent = serde_json::from_str(text)?;
    if event.event_type.is_empty() {
        return Err(CodecError::EmptyType);
    }
    if event.event_type == PONG {
        return Ok(InboundFrame::Pong);
    }
    Ok(InboundFrame::Event(event))
}
