//! End-to-end tests
//!
//! Push channel, event bus, query cache and activity feed wired together
//! the way an application session wires them.

mod dashboard_session;
