//! Dashsync Storage Layer
//!
//! SQLite persistence for the query cache.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dashsync_storage::{default_database_path, Database, SqliteCacheStore};
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let db = Database::open(&default_database_path().unwrap())?;
//! let store = Arc::new(SqliteCacheStore::new(Arc::new(Mutex::new(db))));
//! let cache = QueryCache::builder(config.query).with_store(store).build();
//! ```

mod database;
mod sqlite_store;

pub use database::Database;
pub use sqlite_store::SqliteCacheStore;

/// Default database file name.
pub const DATABASE_FILE: &str = "dashsync-cache.db";

/// Get the default database path for the current platform.
pub fn default_database_path() -> Option<std::path::PathBuf> {
    dirs::data_local_dir().map(|p| p.join("dashsync").join(DATABASE_FILE))
}
