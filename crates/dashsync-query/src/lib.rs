//! Dashsync Query
//!
//! Pull side of the synchronization layer:
//! - `QueryCache`: single-flight fetches, staleness, retries, invalidation
//!   and retention sweep over a pluggable `CacheStore`
//! - `Query<T>`: reactive handle on one key
//! - `MergeView`: fetched and pushed records as one ordered list
//! - `ActivityFeed`: the activity log wired to cache and event bus

mod cache;
mod error;
mod feed;
mod key;
mod merge;
mod query;
mod retry;

pub use cache::{QueryCache, QueryCacheBuilder, QueryOptions};
pub use error::{QueryError, QueryResult};
pub use feed::{ActivityFeed, ActivityFeedOptions};
pub use key::query_key;
pub use merge::{FilterFn, MergeSnapshot, MergeView, DEFAULT_MAX_PUSHED};
pub use query::{Query, QueryState};
pub use retry::RetryPolicy;
