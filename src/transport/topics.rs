//! Topic listener and publisher adapter
//!
//! [`TopicClient`] is the only broker surface the sensor service sees. A
//! [`TopicStream`] yields inbound messages for an exact set of topics and
//! silently drops everything else, so several streams can share one broker
//! handle without seeing each other's traffic.

use super::listeners::Listener;
use super::{BrokerHandle, InboundMessage, MqttError, QoS};
use crate::mqtt_span;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

/// Subscribe, unsubscribe, publish, and receive filtered inbound messages
#[async_trait]
pub trait TopicClient: Send + Sync + 'static {
    /// Open a stream of inbound messages for `topics` without subscribing
    fn open_stream(&self, topics: &[String]) -> TopicStream;

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), MqttError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    /// Open a stream for `topics` and subscribe to them once
    async fn listen(&self, topics: &[String], qos: QoS) -> Result<TopicStream, MqttError> {
        let stream = self.open_stream(topics);
        self.subscribe(topics, qos).await?;
        Ok(stream)
    }
}

/// Filtered stream of inbound messages
///
/// Call [`TopicStream::shutdown`] before dropping it.
pub struct TopicStream {
    topics: HashSet<String>,
    listener: Option<Listener<InboundMessage>>,
}

impl TopicStream {
    pub fn new(listener: Listener<InboundMessage>, topics: &[String]) -> Self {
        Self {
            topics: topics.iter().cloned().collect(),
            listener: Some(listener),
        }
    }

    pub fn topics(&self) -> &HashSet<String> {
        &self.topics
    }

    pub fn is_shut_down(&self) -> bool {
        self.listener.is_none()
    }

    /// Next message on one of the stream's topics
    ///
    /// Returns `None` after `shutdown` or when the broker handle stopped
    /// delivering messages.
    pub async fn next(&mut self) -> Option<InboundMessage> {
        let listener = self.listener.as_mut()?;
        loop {
            let message = listener.recv().await?;
            if self.topics.contains(&message.topic) {
                return Some(message);
            }
        }
    }

    /// Next already-buffered message, without waiting
    pub fn try_next(&mut self) -> Option<InboundMessage> {
        let listener = self.listener.as_mut()?;
        loop {
            let message = listener.try_recv()?;
            if self.topics.contains(&message.topic) {
                return Some(message);
            }
        }
    }

    /// Unregister the underlying listener and end the stream
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            debug!(listener_id = %listener.id(), "Topic stream shut down");
        }
    }
}

impl Drop for TopicStream {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            warn!(
                listener_id = %listener.id(),
                topics = self.topics.len(),
                "Topic stream dropped without shutdown"
            );
        }
    }
}

/// [`TopicClient`] over a shared [`BrokerHandle`]
pub struct TopicAdapter<B: BrokerHandle> {
    broker: Arc<B>,
}

impl<B: BrokerHandle> TopicAdapter<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}

#[async_trait]
impl<B: BrokerHandle> TopicClient for TopicAdapter<B> {
    fn open_stream(&self, topics: &[String]) -> TopicStream {
        TopicStream::new(self.broker.add_message_listener(), topics)
    }

    async fn subscribe(&self, topics: &[String], qos: QoS) -> Result<(), MqttError> {
        let span = mqtt_span!(operation = "subscribe", topics = topics.len(), ?qos);
        self.broker.subscribe(topics, qos).instrument(span).await
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), MqttError> {
        let span = mqtt_span!(operation = "unsubscribe", topics = topics.len());
        self.broker.unsubscribe(topics).instrument(span).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let span = mqtt_span!(operation = "publish", topic = %topic, ?qos, retain);
        self.broker
            .publish(topic, payload, qos, retain)
            .instrument(span)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ListenerSet;

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_stream_filters_by_exact_topic() {
        let messages = ListenerSet::new("message", 8);
        let mut stream = TopicStream::new(messages.register(), &topics(&["a/b"]));

        messages.notify(InboundMessage::new("a/b/c", "1"));
        messages.notify(InboundMessage::new("a", "2"));
        messages.notify(InboundMessage::new("a/b", "3"));

        let message = stream.next().await.unwrap();
        assert_eq!(message.topic, "a/b");
        assert_eq!(message.payload, Bytes::from("3"));
        stream.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream_and_unregisters() {
        let messages = ListenerSet::new("message", 8);
        let mut stream = TopicStream::new(messages.register(), &topics(&["a"]));
        assert_eq!(messages.len(), 1);

        stream.shutdown();
        assert!(stream.is_shut_down());
        assert!(messages.is_empty());
        assert_eq!(stream.next().await, None);

        // idempotent
        stream.shutdown();
    }

    #[test]
    fn test_try_next_drains_buffer_without_waiting() {
        let messages = ListenerSet::new("message", 8);
        let mut stream = TopicStream::new(messages.register(), &topics(&["a"]));

        messages.notify(InboundMessage::new("b", "skip"));
        messages.notify(InboundMessage::new("a", "1"));

        assert_eq!(stream.try_next().map(|m| m.payload), Some(Bytes::from("1")));
        assert_eq!(stream.try_next(), None);
        stream.shutdown();
        assert_eq!(stream.try_next(), None);
    }

    #[tokio::test]
    async fn test_stream_ends_when_source_is_cleared() {
        let messages = ListenerSet::<InboundMessage>::new("message", 8);
        let mut stream = TopicStream::new(messages.register(), &topics(&["a"]));

        messages.clear();
        assert_eq!(stream.next().await, None);
        stream.shutdown();
    }
}
