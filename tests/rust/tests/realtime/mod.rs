//! Push channel integration tests
//!
//! Tests for the connection manager against a scripted transport.
//! All tests run on a paused clock so backoff delays are exact.

mod event_delivery;
mod heartbeat;
