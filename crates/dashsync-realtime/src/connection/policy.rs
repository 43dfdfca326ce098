//! Reconnection policy: exponential backoff plus circuit breaker

use std::time::Duration;

use dashsync_core::ConnectionConfig;

/// How the manager recovers from unexpected channel loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts per disconnect episode
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles for every further attempt
    pub base_delay: Duration,
    /// Refuse further connects after the final failure until reset
    pub circuit_breaker: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            circuit_breaker: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            circuit_breaker: true,
        }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base(),
            circuit_breaker: config.circuit_breaker,
        }
    }

    pub fn with_circuit_breaker(mut self, enabled: bool) -> Self {
        self.circuit_breaker = enabled;
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX)
    }

    /// Whether another attempt is allowed after `attempts_made`
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
