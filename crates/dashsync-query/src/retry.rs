//! Retry policy for fetches

use std::time::Duration;

use dashsync_core::QueryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self::new(config.retry, config.retry_base(), config.retry_max())
    }

    /// Delay before retry `retry` (0-based): `base * 2^retry`, capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}
