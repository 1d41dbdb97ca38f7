//! Pure connection configuration for the MQTT broker handle
//!
//! This module contains the transport error type and the pure functions that
//! turn configuration into `rumqttc` options.

use crate::config::MqttSection;
use crate::transport::QoS;
use rumqttc::v5::{mqttbytes::QoS as WireQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

/// Transport level errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Timed out waiting for ConnAck")]
    ConnectTimeout,
    #[error("A broker session is already established")]
    AlreadyConnected,
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Broker handle has been shut down")]
    HandleShutDown,
    #[error("Timed out waiting for broker acknowledgement")]
    AckTimeout,
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl MqttError {
    /// Wrap a plain message as a connection failure
    pub fn connection_failed<S: Into<String>>(reason: S) -> Self {
        MqttError::ConnectionFailed(reason.into().into())
    }

    pub fn publish_failed<S: Into<String>>(reason: S) -> Self {
        MqttError::PublishFailed(reason.into().into())
    }

    pub fn subscription_failed<S: Into<String>>(reason: S) -> Self {
        MqttError::SubscriptionFailed(reason.into().into())
    }
}

/// Map the crate QoS onto the wire QoS
pub fn wire_qos(qos: QoS) -> WireQoS {
    match qos {
        QoS::AtMostOnce => WireQoS::AtMostOnce,
        QoS::AtLeastOnce => WireQoS::AtLeastOnce,
        QoS::ExactlyOnce => WireQoS::ExactlyOnce,
    }
}

/// Host and port from a broker URL, defaulting the port by scheme
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Build `rumqttc` options for one connection attempt
pub fn configure_mqtt_options(
    config: &MqttSection,
    clean_session: bool,
) -> Result<MqttOptions, MqttError> {
    let (host, port, tls) = parse_broker_url(&config.broker_url)?;
    let mut mqtt_options = MqttOptions::new(config.client_id.clone(), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_start(clean_session);

    Ok(mqtt_options)
}
