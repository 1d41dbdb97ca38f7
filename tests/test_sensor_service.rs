//! Sensor service behavior tests
//!
//! Drives the publish orchestrator through a mock topic client and a
//! hand-fed connection event stream.

mod test_helpers;

use dewpoint_controller::connection::ConnectionEvent;
use dewpoint_controller::error::ControllerResult;
use dewpoint_controller::sensors::Location;
use dewpoint_controller::service::{SensorService, ServiceState};
use dewpoint_controller::testing::{connection_events, MockTopicClient};
use dewpoint_controller::transport::QoS;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{eventually, registry, settle, topics};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

type ServiceTask = JoinHandle<(SensorService<MockTopicClient>, ControllerResult<()>)>;

struct Harness {
    client: Arc<MockTopicClient>,
    events: mpsc::Sender<ConnectionEvent>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ServiceState>,
    task: ServiceTask,
}

impl Harness {
    fn start(locations: &[Location]) -> Self {
        let client = Arc::new(MockTopicClient::new());
        let mut service = SensorService::new(Arc::clone(&client), registry(locations))
            .with_shutdown_timeout(Duration::from_millis(500));
        let state = service.watch_state();
        let (events, stream) = connection_events();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let result = service.run(stream, shutdown_rx).await;
            (service, result)
        });

        Self {
            client,
            events,
            shutdown,
            state,
            task,
        }
    }

    async fn send(&self, event: ConnectionEvent) {
        self.events.send(event).await.unwrap();
    }

    async fn connect(&self) {
        let before = self.client.subscriptions().await.len();
        self.send(ConnectionEvent::Connected).await;
        let client = Arc::clone(&self.client);
        assert!(
            eventually(|| {
                let client = Arc::clone(&client);
                async move { client.subscriptions().await.len() > before }
            })
            .await,
            "service should subscribe after Connected"
        );
    }

    async fn wait_for_publishes(&self, count: usize) -> bool {
        let client = Arc::clone(&self.client);
        eventually(|| {
            let client = Arc::clone(&client);
            async move { client.published().await.len() >= count }
        })
        .await
    }

    async fn stop(self) -> (SensorService<MockTopicClient>, Arc<MockTopicClient>) {
        self.shutdown.send(true).unwrap();
        let (service, result) = tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("service should stop within the shutdown timeout")
            .unwrap();
        result.unwrap();
        (service, self.client)
    }
}

#[tokio::test]
async fn test_subscribes_to_all_sensor_topics_at_least_once() {
    let harness = Harness::start(&[Location::MixedAir, Location::Supply]);
    harness.connect().await;

    let subscriptions = harness.client.subscriptions().await;
    let (subscribed, qos) = &subscriptions[0];
    assert_eq!(*qos, QoS::AtLeastOnce);
    assert_eq!(subscribed.len(), 4);
    assert!(subscribed.contains(&topics(Location::MixedAir).temperature));
    assert!(subscribed.contains(&topics(Location::Supply).humidity));
    assert_eq!(*harness.state.borrow(), ServiceState::Listening);

    harness.stop().await;
}

#[tokio::test]
async fn test_publishes_both_derived_values_once_inputs_are_present() {
    let harness = Harness::start(&[Location::MixedAir]);
    let sensor = topics(Location::MixedAir);
    harness.connect().await;

    harness.client.inject(&sensor.temperature, "75.123");
    settle().await;
    assert!(
        harness.client.published().await.is_empty(),
        "nothing to publish until humidity arrives"
    );

    harness.client.inject(&sensor.humidity, "50");
    assert!(harness.wait_for_publishes(2).await);
    settle().await;

    let published = harness.client.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, sensor.dew_point);
    assert_eq!(published[1].topic, sensor.enthalpy);

    for message in &published {
        assert_eq!(message.qos, QoS::ExactlyOnce);
        assert!(message.retain);

        let text = message.payload_str();
        let value: f64 = text.parse().expect("payload should be a decimal string");
        assert!(value.is_finite());
        let decimals = text.split('.').nth(1).map_or(0, str::len);
        assert!(decimals <= 2, "payload {text} not rounded to hundredths");
    }

    let (service, _) = harness.stop().await;
    assert!(!service.registry().needs_processed());
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_replayed_message_publishes_at_most_once() {
    let harness = Harness::start(&[Location::MixedAir]);
    let sensor = topics(Location::MixedAir);
    harness.connect().await;

    harness.client.inject(&sensor.temperature, "21.5");
    harness.client.inject(&sensor.humidity, "40");
    assert!(harness.wait_for_publishes(2).await);

    harness.client.inject(&sensor.humidity, "40");
    harness.client.inject(&sensor.humidity, "40");
    harness.client.inject(&sensor.temperature, "21.5");
    settle().await;

    assert_eq!(harness.client.published().await.len(), 2);
    harness.stop().await;
}

#[tokio::test]
async fn test_non_numeric_payload_leaves_sensor_untouched() {
    let harness = Harness::start(&[Location::MixedAir]);
    let sensor = topics(Location::MixedAir);
    harness.connect().await;

    harness.client.inject(&sensor.temperature, "not-a-number");
    harness.client.inject(&sensor.humidity, "55");
    settle().await;

    let (service, client) = harness.stop().await;
    let mixed_air = service.registry().get(Location::MixedAir).unwrap();
    assert_eq!(mixed_air.temperature(), None);
    assert_eq!(mixed_air.humidity(), Some(55.0));
    assert!(client.published().await.is_empty());
}

#[tokio::test]
async fn test_out_of_range_humidity_is_stored_but_not_published() {
    let harness = Harness::start(&[Location::MixedAir]);
    let sensor = topics(Location::MixedAir);
    harness.connect().await;

    harness.client.inject(&sensor.temperature, "21.5");
    harness.client.inject(&sensor.humidity, "104.2");
    settle().await;
    assert!(harness.client.published().await.is_empty());

    harness.client.inject(&sensor.humidity, "60");
    assert!(harness.wait_for_publishes(2).await);

    let (service, client) = harness.stop().await;
    let mixed_air = service.registry().get(Location::MixedAir).unwrap();
    assert_eq!(mixed_air.humidity(), Some(60.0));
    assert_eq!(client.published().await.len(), 2);
}

#[tokio::test]
async fn test_disconnect_pauses_publishing_until_reconnected() {
    let harness = Harness::start(&[Location::MixedAir]);
    let sensor = topics(Location::MixedAir);
    harness.connect().await;

    harness.send(ConnectionEvent::Disconnected).await;
    let client = Arc::clone(&harness.client);
    assert!(
        eventually(|| {
            let client = Arc::clone(&client);
            async move { client.unsubscribe_calls().await == 1 }
        })
        .await
    );

    harness.client.inject(&sensor.temperature, "24");
    harness.client.inject(&sensor.humidity, "45");
    settle().await;
    assert!(harness.client.published().await.is_empty());
    assert_eq!(harness.client.subscriptions().await.len(), 1);

    harness.connect().await;
    assert!(harness.wait_for_publishes(2).await);
    assert_eq!(harness.client.subscriptions().await.len(), 2);

    let (service, _) = harness.stop().await;
    assert!(!service.registry().needs_processed());
}

#[tokio::test]
async fn test_shutdown_flushes_dirty_sensor_once() {
    let harness = Harness::start(&[Location::PostCoil]);
    let sensor = topics(Location::PostCoil);

    // never connected, so only the final flush publishes
    harness.client.inject(&sensor.temperature, "12.25");
    harness.client.inject(&sensor.humidity, "90");

    let (service, client) = harness.stop().await;
    let published = client.published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].topic, sensor.dew_point);
    assert_eq!(published[1].topic, sensor.enthalpy);
    assert!(!service.registry().needs_processed());
    assert_eq!(client.unsubscribe_calls().await, 1);
    assert_eq!(client.open_streams(), 0);
}

#[tokio::test]
async fn test_failed_publish_is_retried_on_next_sweep() {
    let harness = Harness::start(&[Location::Return]);
    let sensor = topics(Location::Return);
    harness.connect().await;

    harness.client.set_publish_failure(true);
    harness.client.inject(&sensor.temperature, "22");
    harness.client.inject(&sensor.humidity, "50");
    settle().await;
    assert!(harness.client.published().await.is_empty());

    harness.client.set_publish_failure(false);
    harness.client.inject(&sensor.temperature, "22.5");
    assert!(harness.wait_for_publishes(2).await);
    settle().await;
    assert_eq!(harness.client.published().await.len(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn test_failed_subscribe_retried_on_next_connected() {
    let harness = Harness::start(&[Location::Supply]);
    harness.client.set_subscribe_failure(true);

    harness.send(ConnectionEvent::Connected).await;
    settle().await;
    assert!(harness.client.subscriptions().await.is_empty());
    assert_eq!(*harness.state.borrow(), ServiceState::Listening);

    harness.client.set_subscribe_failure(false);
    harness.send(ConnectionEvent::Disconnected).await;
    harness.connect().await;
    assert_eq!(harness.client.subscriptions().await.len(), 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutting_down_event_stops_service() {
    let harness = Harness::start(&[Location::MixedAir]);
    harness.connect().await;
    harness.send(ConnectionEvent::ShuttingDown).await;

    let (service, result) = tokio::time::timeout(Duration::from_secs(2), harness.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_closed_event_stream_stops_service() {
    let Harness {
        client,
        events,
        shutdown: _shutdown,
        task,
        ..
    } = Harness::start(&[Location::MixedAir]);
    drop(events);

    let (service, result) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(service.state(), ServiceState::Stopped);
    assert_eq!(client.open_streams(), 0);
}

#[tokio::test]
async fn test_messages_for_other_topics_are_ignored() {
    let harness = Harness::start(&[Location::MixedAir]);
    harness.connect().await;

    harness
        .client
        .inject("frankensystem/sensor/attic_temperature/state", "30");
    harness
        .client
        .inject(&topics(Location::Supply).temperature, "30");
    settle().await;

    let (service, client) = harness.stop().await;
    assert_eq!(service.registry().get(Location::MixedAir).unwrap().temperature(), None);
    assert!(client.published().await.is_empty());
}
