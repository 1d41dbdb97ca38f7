//! Transport layer for the controller
//!
//! The rest of the crate talks to the broker through two narrow seams:
//!
//! - [`BrokerHandle`] - connection primitives and listener registration.
//!   Only the connection manager calls `connect`/`disconnect`/`shutdown`.
//! - [`TopicClient`] - subscribe/unsubscribe/publish plus a filtered inbound
//!   stream, used by the sensor service.
//!
//! Both are traits so the service and the manager can be driven by the mocks
//! in [`crate::testing`].

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

pub mod listeners;
pub mod mqtt;
pub mod topics;

pub use listeners::{Listener, ListenerSet};
pub use mqtt::{MqttBroker, MqttError};
pub use topics::{TopicAdapter, TopicClient, TopicStream};

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// A message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Why a live connection ended without being asked to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Event loop failed (socket error, keep-alive timeout, broker restart)
    NetworkError(String),
    /// Broker sent DISCONNECT
    DisconnectedByBroker,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::NetworkError(reason) => write!(f, "network error: {reason}"),
            CloseReason::DisconnectedByBroker => f.write_str("disconnected by broker"),
        }
    }
}

/// Broker connection handle
///
/// Implementations never reconnect on their own. When a live connection
/// drops they notify close listeners and wait for the next `connect`.
#[async_trait]
pub trait BrokerHandle: Send + Sync + 'static {
    /// Open a session, resolving once the broker acknowledged it
    async fn connect(&self, clean_session: bool) -> Result<(), MqttError>;

    /// Close the session intentionally; close listeners are not notified
    async fn disconnect(&self) -> Result<(), MqttError>;

    /// Disconnect, notify shutdown listeners, and make the handle inert
    async fn shutdown(&self) -> Result<(), MqttError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), MqttError>;

    /// True while a session is established
    fn is_active(&self) -> bool;

    fn add_message_listener(&self) -> Listener<InboundMessage>;

    fn add_close_listener(&self) -> Listener<CloseReason>;

    fn add_shutdown_listener(&self) -> Listener<()>;
}
