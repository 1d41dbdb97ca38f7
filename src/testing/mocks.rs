//! Mock implementations for testing
//!
//! [`MockBroker`] stands in for a live [`BrokerHandle`] so the connection
//! manager can be exercised without a broker, and [`MockTopicClient`] stands
//! in for the topic adapter when driving the sensor service.

use crate::connection::{ConnectionEvent, ConnectionEvents};
use crate::transport::{
    BrokerHandle, CloseReason, InboundMessage, Listener, ListenerSet, MqttError, QoS, TopicClient,
    TopicStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

const MOCK_LISTENER_CAPACITY: usize = 64;

/// A message handed to `publish`
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Event stream fed directly by a test
pub fn connection_events() -> (mpsc::Sender<ConnectionEvent>, ConnectionEvents) {
    ConnectionEvents::channel(32)
}

/// Mock broker handle for testing
#[derive(Debug)]
pub struct MockBroker {
    active: AtomicBool,
    shut_down: AtomicBool,
    should_fail: AtomicBool,
    failing_connects: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    clean_sessions: Mutex<Vec<bool>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(Vec<String>, QoS)>>,
    unsubscriptions: Mutex<Vec<Vec<String>>>,
    messages: ListenerSet<InboundMessage>,
    closes: ListenerSet<CloseReason>,
    shutdowns: ListenerSet<()>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            clean_sessions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
            messages: ListenerSet::new("message", MOCK_LISTENER_CAPACITY),
            closes: ListenerSet::new("close", MOCK_LISTENER_CAPACITY),
            shutdowns: ListenerSet::new("shutdown", MOCK_LISTENER_CAPACITY),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connect attempts
    pub fn fail_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make publish and subscribe calls fail
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Drop the session as the network would, notifying close listeners
    pub fn simulate_close(&self, reason: CloseReason) -> usize {
        self.active.store(false, Ordering::SeqCst);
        self.closes.notify(reason)
    }

    /// Deliver a message to every message listener
    pub fn inject_message(&self, message: InboundMessage) -> usize {
        self.messages.notify(message)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn close_listener_count(&self) -> usize {
        self.closes.len()
    }

    pub fn message_listener_count(&self) -> usize {
        self.messages.len()
    }

    /// `clean_session` flag of every connect call, in order
    pub async fn clean_sessions(&self) -> Vec<bool> {
        self.clean_sessions.lock().await.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn subscriptions(&self) -> Vec<(Vec<String>, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn unsubscriptions(&self) -> Vec<Vec<String>> {
        self.unsubscriptions.lock().await.clone()
    }

    fn check_live(&self) -> Result<(), MqttError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MqttError::HandleShutDown);
        }
        if !self.active.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerHandle for MockBroker {
    async fn connect(&self, clean_session: bool) -> Result<(), MqttError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.clean_sessions.lock().await.push(clean_session);

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MqttError::HandleShutDown);
        }
        if self.active.load(Ordering::SeqCst) {
            return Err(MqttError::AlreadyConnected);
        }

        let failing = self
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(MqttError::connection_failed("Mock connection failure"));
        }

        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MqttError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.active.store(false, Ordering::SeqCst);
        self.shutdowns.notify(());
        self.messages.clear();
        self.closes.clear();
        self.shutdowns.clear();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_live()?;
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError> {
        self.check_live()?;
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed(
                "Mock subscription failure".into(),
            ));
        }
        self.subscriptions.lock().await.push((topics.to_vec(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), MqttError> {
        self.check_live()?;
        self.unsubscriptions.lock().await.push(topics.to_vec());
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn add_message_listener(&self) -> Listener<InboundMessage> {
        self.messages.register()
    }

    fn add_close_listener(&self) -> Listener<CloseReason> {
        self.closes.register()
    }

    fn add_shutdown_listener(&self) -> Listener<()> {
        self.shutdowns.register()
    }
}

/// Mock topic client for driving the sensor service
#[derive(Debug)]
pub struct MockTopicClient {
    messages: ListenerSet<InboundMessage>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(Vec<String>, QoS)>>,
    unsubscribe_calls: AtomicUsize,
    publish_failure: AtomicBool,
    subscribe_failure: AtomicBool,
}

impl Default for MockTopicClient {
    fn default() -> Self {
        Self {
            messages: ListenerSet::new("message", MOCK_LISTENER_CAPACITY),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscribe_calls: AtomicUsize::new(0),
            publish_failure: AtomicBool::new(false),
            subscribe_failure: AtomicBool::new(false),
        }
    }
}

impl MockTopicClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.publish_failure.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.subscribe_failure.store(fail, Ordering::SeqCst);
    }

    /// Deliver a raw payload to every open stream
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        self.messages.notify(InboundMessage::new(topic, payload))
    }

    /// End every open stream as a shut-down broker would
    pub fn close_streams(&self) {
        self.messages.clear();
    }

    pub fn open_streams(&self) -> usize {
        self.messages.len()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn clear_published(&self) {
        self.published.lock().await.clear();
    }

    pub async fn subscriptions(&self) -> Vec<(Vec<String>, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicClient for MockTopicClient {
    fn open_stream(&self, topics: &[String]) -> TopicStream {
        TopicStream::new(self.messages.register(), topics)
    }

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError> {
        if self.subscribe_failure.load(Ordering::SeqCst) {
            return Err(MqttError::SubscriptionFailed(
                "Mock subscription failure".into(),
            ));
        }
        self.subscriptions.lock().await.push((topics.to_vec(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, _topics: &[String]) -> Result<(), MqttError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        if self.publish_failure.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_connect_failures_count_down() {
        let broker = MockBroker::new();
        broker.fail_connects(2);

        assert!(broker.connect(false).await.is_err());
        assert!(broker.connect(false).await.is_err());
        assert!(broker.connect(false).await.is_ok());
        assert!(matches!(
            broker.connect(false).await,
            Err(MqttError::AlreadyConnected)
        ));
        assert_eq!(broker.connect_calls(), 4);
    }

    #[tokio::test]
    async fn test_mock_broker_publish_requires_session() {
        let broker = MockBroker::new();
        let result = broker
            .publish("t", Bytes::from_static(b"1"), QoS::AtMostOnce, false)
            .await;
        assert!(matches!(result, Err(MqttError::NotConnected)));

        broker.connect(true).await.unwrap();
        broker
            .publish("t", Bytes::from_static(b"1"), QoS::AtMostOnce, false)
            .await
            .unwrap();
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_broker_close_notifies_listeners() {
        let broker = MockBroker::new();
        let mut closes = broker.add_close_listener();
        broker.connect(false).await.unwrap();

        assert_eq!(broker.simulate_close(CloseReason::DisconnectedByBroker), 1);
        assert_eq!(closes.recv().await, Some(CloseReason::DisconnectedByBroker));
        assert!(!broker.is_active());
    }

    #[tokio::test]
    async fn test_mock_broker_shutdown_is_terminal() {
        let broker = MockBroker::new();
        let mut shutdowns = broker.add_shutdown_listener();

        broker.shutdown().await.unwrap();
        broker.shutdown().await.unwrap();

        assert_eq!(shutdowns.recv().await, Some(()));
        assert_eq!(shutdowns.recv().await, None);
        assert!(matches!(
            broker.connect(false).await,
            Err(MqttError::HandleShutDown)
        ));
    }

    #[tokio::test]
    async fn test_mock_topic_client_records_publishes() {
        let client = MockTopicClient::new();
        client
            .publish("a/b", Bytes::from_static(b"12.5"), QoS::ExactlyOnce, true)
            .await
            .unwrap();

        let published = client.published().await;
        assert_eq!(published[0].payload_str(), "12.5");
        assert!(published[0].retain);
    }
}
