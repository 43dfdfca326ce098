//! Push-channel lifecycle: state machine, reconnection and circuit breaker

mod listeners;
mod manager;
mod policy;

pub use manager::{
    ConnectOutcome, ConnectionManager, ConnectionManagerBuilder, ConnectionStats,
    HeartbeatConfig, ReconnectScheduled, TerminalFailure,
};
pub use policy::ReconnectPolicy;
