//! MQTT broker handle over `rumqttc`
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - transport errors and option building
//! - [`message_handler`] - pure routing of event loop events
//! - [`acks`] - matching publishes and subscribes to broker acknowledgements
//! - [`client`] - the [`MqttBroker`] handle and its driver task
//!
//! # Usage
//!
//! ```rust,no_run
//! use dewpoint_controller::config::MqttSection;
//! use dewpoint_controller::transport::{BrokerHandle, MqttBroker};
//!
//! # tokio_test::block_on(async {
//! let broker = MqttBroker::new(MqttSection::default())?;
//! broker.connect(false).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod acks;
pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttBroker;
pub use connection::{configure_mqtt_options, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
