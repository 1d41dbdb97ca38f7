//! Test helpers and utilities for integration tests

use dewpoint_controller::config::{ControllerConfig, SensorsSection};
use dewpoint_controller::connection::ReconnectConfig;
use dewpoint_controller::sensors::{Location, SensorRegistry, SensorTopics};
use std::future::Future;
use std::time::Duration;

#[allow(dead_code)]
pub const PREFIX: &str = "frankensystem";

/// Registry with sensors at the given locations under [`PREFIX`]
#[allow(dead_code)]
pub fn registry(locations: &[Location]) -> SensorRegistry {
    SensorRegistry::from_config(&SensorsSection {
        topic_prefix: PREFIX.to_string(),
        altitude_feet: 800.0,
        locations: locations.to_vec(),
    })
}

#[allow(dead_code)]
pub fn topics(location: Location) -> SensorTopics {
    SensorTopics::new(PREFIX, location)
}

/// Backoff short enough to keep reconnect tests fast
#[allow(dead_code)]
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        max_attempts: None,
        backoff_pattern: vec![5, 10],
        sustained_delay: 10,
    }
}

#[allow(dead_code)]
pub fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.sensors.topic_prefix = PREFIX.to_string();
    config.sensors.locations = vec![Location::MixedAir];
    config
}

/// Poll `condition` until it holds or two seconds pass
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Give spawned tasks a moment to react to an input
#[allow(dead_code)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
