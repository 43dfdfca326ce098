//! Domain types and value objects
//!
//! This module contains all domain-level types for Dashsync:
//! - Value Objects (ConnectionState, ActivityFilter, NotificationLevel)
//! - Push channel messages (PushEvent, OutboundMessage)
//! - Records merged into live views (ActivityLogEntry, MergeItem)

mod activity;
mod connection;
pub mod event;
mod notification;

pub use activity::{ActivityFilter, ActivityLogEntry, MergeItem};
pub use connection::ConnectionState;
pub use event::{OutboundMessage, PushEvent};
pub use notification::{Notification, NotificationLevel};
