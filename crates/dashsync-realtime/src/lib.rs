//! Dashsync Realtime
//!
//! Push-channel side of the synchronization layer:
//! - `ConnectionManager`: connection state machine, exponential backoff
//!   reconnection, circuit breaker, heartbeat
//! - `Transport` seam with a WebSocket implementation and its JSON codec
//! - `NotificationAdapter`: push events to user-facing notifications
//!
//! Decoded events are published on the shared `dashsync_core::EventBus`.

pub mod connection;
pub mod notifications;
pub mod transport;

pub use connection::{
    ConnectOutcome, ConnectionManager, ConnectionManagerBuilder, ConnectionStats,
    HeartbeatConfig, ReconnectPolicy, ReconnectScheduled, TerminalFailure,
};
pub use notifications::{NotificationAdapter, NotificationSink};
pub use transport::{ChannelHandle, ChannelSignal, Transport, TransportError, WebSocketTransport};
