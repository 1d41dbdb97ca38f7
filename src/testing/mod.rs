//! Testing utilities and mock implementations
//!
//! Mocks for the broker and topic seams so the connection manager and the
//! sensor service can be tested without an MQTT broker.

pub mod mocks;

pub use mocks::*;
