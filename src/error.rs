//! Error taxonomy for the dew point controller
//!
//! Every runtime failure in the control loop maps onto one of these variants.
//! Nothing here is fatal to the process: the service logs the error and keeps
//! running, except for configuration failures surfaced during bootstrap.

use crate::sensors::Location;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Connection error")]
    Connection(#[source] MqttError),

    #[error("Failed to decode payload on topic {topic}: {payload:?}")]
    Decoding { topic: String, payload: String },

    #[error("No sensor owns topic: {topic}")]
    SensorNotFound { topic: String },

    #[error("No sensor registered at location: {location}")]
    UnknownLocation { location: Location },

    #[error("Failed to publish to {topic}")]
    Publish {
        topic: String,
        #[source]
        source: MqttError,
    },

    #[error("Failed to subscribe to sensor topics")]
    Subscribe(#[source] MqttError),

    #[error("Sensor service requires at least one sensor")]
    NoSensors,

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl ControllerError {
    /// Create decoding error, keeping a lossy copy of the offending payload
    pub fn decoding<S: Into<String>>(topic: S, payload: &[u8]) -> Self {
        Self::Decoding {
            topic: topic.into(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }

    /// Create sensor-not-found error
    pub fn sensor_not_found<S: Into<String>>(topic: S) -> Self {
        Self::SensorNotFound {
            topic: topic.into(),
        }
    }

    /// Create publish error
    pub fn publish<S: Into<String>>(topic: S, source: MqttError) -> Self {
        Self::Publish {
            topic: topic.into(),
            source,
        }
    }

    /// Whether the error points at a programming or configuration mistake
    /// rather than a transient network condition
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ControllerError::SensorNotFound { .. }
                | ControllerError::UnknownLocation { .. }
                | ControllerError::NoSensors
                | ControllerError::Config(_)
        )
    }
}

/// Result type for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;
