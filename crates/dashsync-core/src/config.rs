//! Runtime configuration
//!
//! Every field has a default; environment variables (optionally loaded from a
//! `.env` file) or a JSON file override them.
//!
//! | Variable | Field |
//! |---|---|
//! | `DASHSYNC_WS_URL` | `connection.url` |
//! | `DASHSYNC_MAX_RECONNECT_ATTEMPTS` | `connection.max_reconnect_attempts` |
//! | `DASHSYNC_RECONNECT_BASE_MS` | `connection.reconnect_base_ms` |
//! | `DASHSYNC_CIRCUIT_BREAKER` | `connection.circuit_breaker` |
//! | `DASHSYNC_CONNECT_TIMEOUT_MS` | `connection.connect_timeout_ms` |
//! | `DASHSYNC_HEARTBEAT_INTERVAL_MS` | `connection.heartbeat_interval_ms` (0 disables) |
//! | `DASHSYNC_HEARTBEAT_TIMEOUT_MS` | `connection.heartbeat_timeout_ms` |
//! | `DASHSYNC_ROOMS` | `connection.rooms` (comma separated) |
//! | `DASHSYNC_STALE_TIME_MS` | `query.stale_time_ms` |
//! | `DASHSYNC_QUERY_RETRY` | `query.retry` |
//! | `DASHSYNC_RETRY_BASE_MS` | `query.retry_base_ms` |
//! | `DASHSYNC_CACHE_RETENTION_MS` | `query.retention_ms` |
//! | `DASHSYNC_SWEEP_INTERVAL_MS` | `query.sweep_interval_ms` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Push channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
    /// Stop all connect attempts after the final failure until reset
    pub circuit_breaker: bool,
    pub connect_timeout_ms: u64,
    /// Zero disables heartbeats
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Rooms the monitor joins on connect
    pub rooms: Vec<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_ms: 1_000,
            circuit_breaker: true,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 25_000,
            heartbeat_timeout_ms: 60_000,
            rooms: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Query cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub stale_time_ms: u64,
    pub retry: u32,
    pub retry_base_ms: u64,
    /// Upper bound for a single retry delay
    pub retry_max_ms: u64,
    /// Idle entries older than this are evicted by the sweep
    pub retention_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 30_000,
            retry: 3,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
            retention_ms: 10 * 60 * 1_000,
            sweep_interval_ms: 5 * 60 * 1_000,
        }
    }
}

impl QueryConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub connection: ConnectionConfig,
    pub query: QueryConfig,
}

impl SyncConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("[Config] Loaded environment from {:?}", path);
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let conn = &mut config.connection;

        if let Some(url) = lookup("DASHSYNC_WS_URL") {
            validate_ws_url(&url)?;
            conn.url = url;
        }
        override_parsed(&lookup, "DASHSYNC_MAX_RECONNECT_ATTEMPTS", &mut conn.max_reconnect_attempts)?;
        override_parsed(&lookup, "DASHSYNC_RECONNECT_BASE_MS", &mut conn.reconnect_base_ms)?;
        override_parsed(&lookup, "DASHSYNC_CIRCUIT_BREAKER", &mut conn.circuit_breaker)?;
        override_parsed(&lookup, "DASHSYNC_CONNECT_TIMEOUT_MS", &mut conn.connect_timeout_ms)?;
        override_parsed(&lookup, "DASHSYNC_HEARTBEAT_INTERVAL_MS", &mut conn.heartbeat_interval_ms)?;
        override_parsed(&lookup, "DASHSYNC_HEARTBEAT_TIMEOUT_MS", &mut conn.heartbeat_timeout_ms)?;
        if let Some(rooms) = lookup("DASHSYNC_ROOMS") {
            conn.rooms = rooms
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }

        let query = &mut config.query;
        override_parsed(&lookup, "DASHSYNC_STALE_TIME_MS", &mut query.stale_time_ms)?;
        override_parsed(&lookup, "DASHSYNC_QUERY_RETRY", &mut query.retry)?;
        override_parsed(&lookup, "DASHSYNC_RETRY_BASE_MS", &mut query.retry_base_ms)?;
        override_parsed(&lookup, "DASHSYNC_CACHE_RETENTION_MS", &mut query.retention_ms)?;
        override_parsed(&lookup, "DASHSYNC_SWEEP_INTERVAL_MS", &mut query.sweep_interval_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_ws_url(&self.connection.url)?;
        if self.query.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "query.sweep_interval_ms",
                value: "0".to_string(),
                reason: "sweep interval must be positive".to_string(),
            });
        }
        if self.connection.heartbeat_interval_ms > 0
            && self.connection.heartbeat_timeout_ms <= self.connection.heartbeat_interval_ms
        {
            return Err(ConfigError::InvalidValue {
                name: "connection.heartbeat_timeout_ms",
                value: self.connection.heartbeat_timeout_ms.to_string(),
                reason: "heartbeat timeout must exceed the heartbeat interval".to_string(),
            });
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, name: &'static str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn validate_ws_url(raw: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        name: "DASHSYNC_WS_URL",
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            name: "DASHSYNC_WS_URL",
            value: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}
