//! Connection state of the push channel.

use serde::{Deserialize, Serialize};

/// Push channel connection state
///
/// Exactly one of four states; only the connection manager transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected (initial state, and the state after an explicit disconnect)
    #[default]
    Disconnected,
    /// A channel is being opened
    Connecting,
    /// The channel is open and events are flowing
    Connected,
    /// The channel closed or failed unexpectedly
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "errored",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States from which `connect()` may start a new attempt
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Errored)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
