//! Sensor service: the change-driven publish orchestrator
//!
//! The service owns the [`SensorRegistry`] and runs a single loop that reacts
//! to connection events, inbound sensor messages, and the graceful-shutdown
//! signal. Registry mutation and publish decisions therefore never race.
//!
//! ```text
//! Idle -> Subscribing -> Listening -> Unsubscribing -> Listening
//!                                  \-> Flushing -> Stopped
//! ```

use crate::config::ControllerConfig;
use crate::connection::{wait_for_shutdown, ConnectionEvent, ConnectionEvents};
use crate::error::{ControllerError, ControllerResult};
use crate::psychrometrics::{MagnusPsychrometrics, Psychrometrics};
use crate::sensor_span;
use crate::sensors::{decode_reading, encode_value, Location, ReadingKind, SensorRegistry};
use crate::transport::{InboundMessage, QoS, TopicClient, TopicStream};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Inbound sensor topics are subscribed at least once
pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
/// Derived values are published exactly once and retained
pub const PUBLISH_QOS: QoS = QoS::ExactlyOnce;

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Subscribing,
    Listening,
    Unsubscribing,
    Flushing,
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Publishes dew point and enthalpy whenever a sensor's inputs change
pub struct SensorService<C: TopicClient> {
    client: Arc<C>,
    registry: SensorRegistry,
    psychrometrics: Arc<dyn Psychrometrics>,
    shutdown_timeout: Duration,
    connected: bool,
    state_tx: watch::Sender<ServiceState>,
}

impl<C: TopicClient> SensorService<C> {
    pub fn new(client: Arc<C>, registry: SensorRegistry) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Idle);
        Self {
            client,
            registry,
            psychrometrics: Arc::new(MagnusPsychrometrics),
            shutdown_timeout: Duration::from_secs(3),
            connected: false,
            state_tx,
        }
    }

    /// Service with a registry and timeouts from configuration
    pub fn from_config(client: Arc<C>, config: &ControllerConfig) -> Self {
        Self::new(client, SensorRegistry::from_config(&config.sensors))
            .with_shutdown_timeout(config.service.shutdown_timeout())
    }

    pub fn with_psychrometrics(mut self, psychrometrics: Arc<dyn Psychrometrics>) -> Self {
        self.psychrometrics = psychrometrics;
        self
    }

    /// Bound on the final publish flush
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions from outside the service loop
    pub fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ServiceState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Sensor service state change");
        }
    }

    /// Run until the connection stream reports shutdown or `shutdown` fires
    pub async fn run(
        &mut self,
        mut events: ConnectionEvents,
        mut shutdown: watch::Receiver<bool>,
    ) -> ControllerResult<()> {
        if self.registry.is_empty() {
            return Err(ControllerError::NoSensors);
        }

        let topics = self.registry.subscription_topics();
        let mut stream = self.client.open_stream(&topics);
        info!(
            sensors = self.registry.len(),
            topics = topics.len(),
            "Sensor service started"
        );

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Graceful shutdown requested");
                    break;
                }
                event = events.next() => match event {
                    Some(ConnectionEvent::Connected) => self.on_connected(&topics).await,
                    Some(ConnectionEvent::Disconnected) => self.on_disconnected(&topics).await,
                    Some(ConnectionEvent::ShuttingDown) | None => {
                        info!("Connection manager shutting down");
                        break;
                    }
                },
                message = stream.next() => match message {
                    Some(message) => self.on_message(message).await,
                    None => {
                        warn!("Sensor topic stream ended");
                        break;
                    }
                },
            }
        }

        self.stop(&topics, &mut stream).await;
        Ok(())
    }

    async fn on_connected(&mut self, topics: &[String]) {
        if self.connected {
            debug!("Ignoring repeated connected event");
            return;
        }
        self.connected = true;

        self.set_state(ServiceState::Subscribing);
        match self.client.subscribe(topics, SUBSCRIBE_QOS).await {
            Ok(()) => info!(topics = topics.len(), "Subscribed to sensor topics"),
            Err(e) => {
                let error = ControllerError::Subscribe(e);
                error!(error = %error, cause = ?error, "Waiting for next connection");
            }
        }
        self.set_state(ServiceState::Listening);

        self.publish_pending().await;
    }

    async fn on_disconnected(&mut self, topics: &[String]) {
        if !self.connected && self.state() != ServiceState::Idle {
            debug!("Ignoring repeated disconnected event");
            return;
        }
        self.connected = false;

        self.set_state(ServiceState::Unsubscribing);
        if let Err(e) = self.client.unsubscribe(topics).await {
            debug!(error = %e, "Unsubscribe after disconnect failed");
        }
        self.set_state(ServiceState::Listening);
        info!("Disconnected, publishing paused");
    }

    async fn on_message(&mut self, message: InboundMessage) {
        if self.apply_message(&message) && self.connected {
            self.publish_pending().await;
        }
    }

    /// Decode and record a reading; returns whether the registry accepted it
    fn apply_message(&mut self, message: &InboundMessage) -> bool {
        let span = sensor_span!(topic = %message.topic, retain = message.retain);
        let _enter = span.enter();

        let Some(kind) = ReadingKind::classify(&message.topic) else {
            warn!(topic = %message.topic, "Message on unrecognised topic dropped");
            return false;
        };

        let reading = match decode_reading(kind, &message.topic, &message.payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable reading");
                return false;
            }
        };

        match self.registry.update(&message.topic, reading) {
            Ok(changed) => {
                debug!(?reading, changed, "Reading applied");
                true
            }
            Err(e) => {
                error!(error = %e, "Reading routed to no sensor");
                false
            }
        }
    }

    /// Publish derived values for every sensor with unpublished changes
    ///
    /// A sensor is marked processed only after all of its publishes
    /// succeeded; failures leave it dirty for the next sweep.
    async fn publish_pending(&mut self) {
        for location in self.registry.dirty() {
            match self.publish_sensor(location).await {
                Ok(published) => {
                    if let Err(e) = self.registry.has_processed(location) {
                        error!(%location, error = %e, "Failed to clear dirty flags");
                    } else {
                        debug!(%location, published, "Sensor processed");
                    }
                }
                Err(e) => {
                    warn!(%location, error = %e, "Publish failed, will retry on next sweep");
                }
            }
        }
    }

    /// Returns how many values were published
    async fn publish_sensor(&self, location: Location) -> ControllerResult<usize> {
        let sensor = self
            .registry
            .get(location)
            .ok_or(ControllerError::UnknownLocation { location })?;

        let Some(derived) = sensor.derived(self.psychrometrics.as_ref()) else {
            debug!(%location, "Derived values unavailable, nothing to publish");
            return Ok(0);
        };

        let topics = sensor.topics();
        let outputs = [
            (&topics.dew_point, derived.dew_point),
            (&topics.enthalpy, derived.enthalpy),
        ];

        let mut published = 0;
        for (topic, value) in outputs {
            let Some(value) = value else {
                continue;
            };
            let payload = encode_value(value);
            self.client
                .publish(topic, Bytes::from(payload.clone()), PUBLISH_QOS, true)
                .await
                .map_err(|e| ControllerError::publish(topic.as_str(), e))?;
            debug!(%location, topic = %topic, payload = %payload, "Published derived value");
            published += 1;
        }
        Ok(published)
    }

    /// Apply buffered readings, final flush, unsubscribe, stream teardown
    async fn stop(&mut self, topics: &[String], stream: &mut TopicStream) {
        self.set_state(ServiceState::Flushing);

        let mut drained = 0;
        while let Some(message) = stream.try_next() {
            self.apply_message(&message);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Applied buffered readings before final flush");
        }

        if self.registry.needs_processed() {
            let timeout = self.shutdown_timeout;
            if tokio::time::timeout(timeout, self.publish_pending())
                .await
                .is_err()
            {
                warn!(?timeout, "Final publish flush timed out");
            }
        }

        match tokio::time::timeout(self.shutdown_timeout, self.client.unsubscribe(topics)).await {
            Ok(Ok(())) => debug!("Unsubscribed from sensor topics"),
            Ok(Err(e)) => debug!(error = %e, "Unsubscribe during shutdown failed"),
            Err(_) => warn!("Unsubscribe during shutdown timed out"),
        }

        stream.shutdown();
        self.connected = false;
        self.set_state(ServiceState::Stopped);
        info!("Sensor service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorsSection;
    use crate::testing::MockTopicClient;

    fn service(client: Arc<MockTopicClient>) -> SensorService<MockTopicClient> {
        let registry = SensorRegistry::from_config(&SensorsSection {
            topic_prefix: "test".to_string(),
            altitude_feet: 800.0,
            locations: vec![Location::MixedAir],
        });
        SensorService::new(client, registry).with_shutdown_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_run_rejects_empty_registry() {
        let client = Arc::new(MockTopicClient::new());
        let mut service = SensorService::new(client, SensorRegistry::default());
        let (_tx, events) = crate::testing::connection_events();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let result = service.run(events, shutdown_rx).await;
        assert!(matches!(result, Err(ControllerError::NoSensors)));
        assert_eq!(service.state(), ServiceState::Idle);
    }

    #[tokio::test]
    async fn test_publish_sensor_skips_when_inputs_missing() {
        let client = Arc::new(MockTopicClient::new());
        let service = service(Arc::clone(&client));

        let published = service.publish_sensor(Location::MixedAir).await.unwrap();
        assert_eq!(published, 0);
        assert!(client.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_sensor_dirty() {
        let client = Arc::new(MockTopicClient::new());
        let mut service = service(Arc::clone(&client));
        service
            .registry
            .update(
                "test/sensor/mixed_air_temperature/state",
                crate::sensors::Reading::Temperature(24.0),
            )
            .unwrap();
        service
            .registry
            .update(
                "test/sensor/mixed_air_humidity/state",
                crate::sensors::Reading::Humidity(50.0),
            )
            .unwrap();

        client.set_publish_failure(true);
        service.publish_pending().await;
        assert!(service.registry().needs_processed());

        client.set_publish_failure(false);
        service.publish_pending().await;
        assert!(!service.registry().needs_processed());
        assert_eq!(client.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_reaches_stopped_state() {
        let client = Arc::new(MockTopicClient::new());
        let mut service = service(Arc::clone(&client));
        let topics = service.registry().subscription_topics();
        let mut stream = client.open_stream(&topics);

        service.stop(&topics, &mut stream).await;
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(stream.is_shut_down());
        assert_eq!(client.unsubscribe_calls().await, 1);
    }
}
