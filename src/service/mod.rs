//! Long-running services and broker-facing clients

pub mod relays;
pub mod sensors;

pub use relays::{Relay, RelayClient, RelayCommand, RELAY_QOS};
pub use sensors::{SensorService, ServiceState, PUBLISH_QOS, SUBSCRIBE_QOS};
