//! Query error types

use thiserror::Error;

/// Error surfaced to every caller waiting on a key
///
/// `Clone` because one shared fetch fans its failure out to all waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("fetch for '{key}' failed after {attempts} attempt(s): {message}")]
    Fetch {
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("cached data for '{key}' has an unexpected shape: {message}")]
    Decode { key: String, message: String },

    #[error("value for '{key}' could not be serialized: {message}")]
    Encode { key: String, message: String },

    #[error("cache storage error: {0}")]
    Storage(String),

    #[error("fetch task for '{key}' ended unexpectedly")]
    Aborted { key: String },
}

impl QueryError {
    pub fn key(&self) -> Option<&str> {
        match self {
            QueryError::Fetch { key, .. }
            | QueryError::Decode { key, .. }
            | QueryError::Encode { key, .. }
            | QueryError::Aborted { key } => Some(key),
            QueryError::Storage(_) => None,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
