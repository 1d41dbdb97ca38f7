//! Connection lifecycle management
//!
//! - [`manager`] - the [`ConnectionManager`] and its reconnect supervisor
//! - [`events`] - the deduplicated [`ConnectionEvent`] stream
//! - [`reconnect`] - pure backoff policy

pub mod events;
pub mod manager;
pub mod reconnect;

pub use events::{ConnectionEvent, ConnectionEvents, EventDeduplicator};
pub use manager::ConnectionManager;
pub use reconnect::{should_attempt_reconnection, ReconnectConfig, ReconnectionDecision};

pub(crate) use manager::wait_for_shutdown;
