//! # Dashsync Core Library
//!
//! Shared building blocks of the dashboard synchronization layer.
//!
//! ## Modules
//!
//! - `domain` - Connection state, push messages, activity log records
//! - `event_bus` - In-process fan-out of push events
//! - `store` - Cache entry storage contracts and the in-memory backend
//! - `subscription` - Unsubscribe handles
//! - `clock` - Wall-clock abstraction for cache timestamps
//! - `config` - Runtime configuration

pub mod clock;
pub mod config;
pub mod domain;
pub mod event_bus;
pub mod store;
pub mod subscription;

// Re-export commonly used types
pub use domain::*;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConnectionConfig, QueryConfig, SyncConfig};
pub use event_bus::{CatchAllCallback, EventBus, EventCallback, EventReceiver};
pub use store::{CacheEntry, CacheStore, MemoryCacheStore, StoreResult};
pub use subscription::Subscription;
