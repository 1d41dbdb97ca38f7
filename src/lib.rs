//! Dew point controller
//!
//! Listens for temperature and relative humidity readings from HVAC air
//! sensors over MQTT and publishes each sensor's dew point and enthalpy
//! whenever one of its inputs changes.
//!
//! # Overview
//!
//! - [`connection`] - the [`ConnectionManager`], sole owner of connect,
//!   reconnect, and shutdown decisions, exposing a deduplicated
//!   [`ConnectionEvent`] stream
//! - [`sensors`] - sensors, change tracking, and the [`SensorRegistry`]
//! - [`service`] - the [`SensorService`] publish orchestrator and the
//!   [`RelayClient`] for relay commands
//! - [`transport`] - the broker handle, the live `rumqttc` implementation,
//!   and the topic listener/publisher adapter
//! - [`psychrometrics`] - dew point and enthalpy formulas
//!
//! # Quick Start
//!
//! ```rust
//! use dewpoint_controller::psychrometrics::MagnusPsychrometrics;
//! use dewpoint_controller::sensors::{Location, Reading, Sensor};
//!
//! let mut sensor = Sensor::new(Location::MixedAir, "frankensystem", 800.0);
//! assert_eq!(
//!     sensor.topics().temperature,
//!     "frankensystem/sensor/mixed_air_temperature/state"
//! );
//!
//! sensor.apply(Reading::Temperature(24.0));
//! sensor.apply(Reading::Humidity(50.0));
//! assert!(sensor.needs_processed());
//!
//! let derived = sensor.derived(&MagnusPsychrometrics).unwrap();
//! assert!(derived.dew_point.is_some());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod psychrometrics;
pub mod sensors;
pub mod service;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ControllerConfig};
pub use connection::{ConnectionEvent, ConnectionEvents, ConnectionManager, ReconnectConfig};
pub use error::{ControllerError, ControllerResult};
pub use sensors::{Location, Sensor, SensorRegistry};
pub use service::{Relay, RelayClient, RelayCommand, SensorService, ServiceState};
pub use transport::{BrokerHandle, MqttBroker, QoS, TopicAdapter, TopicClient};
