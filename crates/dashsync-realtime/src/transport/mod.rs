//! Transport abstraction for the push channel
//!
//! A [`Transport`] knows how to open one channel to the backend. The
//! connection manager owns the returned [`ChannelHandle`] exclusively and asks
//! the transport for a fresh one on every (re)connect attempt. New transports
//! can be added without touching the manager.

pub mod codec;
mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use dashsync_core::{OutboundMessage, PushEvent};
use thiserror::Error;
use tokio::sync::mpsc;

pub use websocket::WebSocketTransport;

/// Transport-level failures
///
/// These never reach callers of the connection manager; they only drive the
/// reconnection policy and the reported connection state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("send failed: {0}")]
    Send(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Signals delivered from an open channel to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// A decoded application event
    Event(PushEvent),
    /// Heartbeat reply (or any keep-alive traffic)
    Pong,
    /// The remote side closed the channel
    Closed { reason: Option<String> },
    /// The channel failed
    Error(TransportError),
}

/// A live channel: outbound control messages in, inbound signals out
///
/// Dropping the outbound sender closes the channel.
pub struct ChannelHandle {
    pub outbound: mpsc::UnboundedSender<OutboundMessage>,
    pub inbound: mpsc::UnboundedReceiver<ChannelSignal>,
}

impl ChannelHandle {
    pub fn new(
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        inbound: mpsc::UnboundedReceiver<ChannelSignal>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish()
    }
}

/// Transport trait for push channels
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new channel; resolves once the channel is usable
    async fn open(&self) -> Result<ChannelHandle, TransportError>;

    /// Get a description for logging
    fn description(&self) -> String;
}
