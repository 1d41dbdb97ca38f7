//! Registry of tracked sensors
//!
//! The registry is built once at startup and owned by the sensor service for
//! the life of the process. It routes inbound topics to sensors and answers
//! which sensors have readings waiting to be published.

use super::sensor::{Location, Reading, Sensor};
use crate::config::SensorsSection;
use crate::error::ControllerError;
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct SensorRegistry {
    sensors: Vec<Sensor>,
}

impl SensorRegistry {
    pub fn new(sensors: Vec<Sensor>) -> Self {
        Self { sensors }
    }

    /// Build one sensor per configured location
    pub fn from_config(config: &SensorsSection) -> Self {
        Self::new(
            config
                .locations
                .iter()
                .map(|&location| Sensor::new(location, &config.topic_prefix, config.altitude_feet))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn get(&self, location: Location) -> Option<&Sensor> {
        self.sensors.iter().find(|sensor| sensor.id() == location)
    }

    /// Every inbound (temperature and humidity) topic, in registry order
    pub fn subscription_topics(&self) -> Vec<String> {
        self.sensors
            .iter()
            .flat_map(|sensor| {
                let topics = sensor.topics();
                [topics.temperature.clone(), topics.humidity.clone()]
            })
            .collect()
    }

    /// Apply a reading to the sensor that owns `topic`
    ///
    /// Returns whether the sensor's value changed.
    pub fn update(&mut self, topic: &str, reading: Reading) -> Result<bool, ControllerError> {
        let sensor = self
            .sensors
            .iter_mut()
            .find(|sensor| sensor.topics().owns(topic))
            .ok_or_else(|| ControllerError::sensor_not_found(topic))?;

        let changed = sensor.apply(reading);
        trace!(
            location = %sensor.id(),
            ?reading,
            changed,
            "Applied sensor reading"
        );
        Ok(changed)
    }

    /// True when any sensor has unpublished changes
    pub fn needs_processed(&self) -> bool {
        self.sensors.iter().any(Sensor::needs_processed)
    }

    /// Locations of sensors with unpublished changes
    pub fn dirty(&self) -> Vec<Location> {
        self.sensors
            .iter()
            .filter(|sensor| sensor.needs_processed())
            .map(Sensor::id)
            .collect()
    }

    /// Clear both dirty flags of a sensor after its derived values were published
    pub fn has_processed(&mut self, location: Location) -> Result<(), ControllerError> {
        let sensor = self
            .sensors
            .iter_mut()
            .find(|sensor| sensor.id() == location)
            .ok_or(ControllerError::UnknownLocation { location })?;
        sensor.has_processed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SensorRegistry {
        SensorRegistry::from_config(&SensorsSection {
            topic_prefix: "p".to_string(),
            altitude_feet: 800.0,
            locations: vec![Location::MixedAir, Location::Supply],
        })
    }

    #[test]
    fn test_from_config_builds_one_sensor_per_location() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(Location::MixedAir).is_some());
        assert!(registry.get(Location::Return).is_none());
    }

    #[test]
    fn test_subscription_topics_cover_inbound_topics_only() {
        let topics = registry().subscription_topics();
        assert_eq!(
            topics,
            vec![
                "p/sensor/mixed_air_temperature/state",
                "p/sensor/mixed_air_humidity/state",
                "p/sensor/supply_temperature/state",
                "p/sensor/supply_humidity/state",
            ]
        );
    }

    #[test]
    fn test_update_routes_to_owning_sensor() {
        let mut registry = registry();
        let changed = registry
            .update("p/sensor/supply_temperature/state", Reading::Temperature(18.0))
            .unwrap();

        assert!(changed);
        assert_eq!(registry.dirty(), vec![Location::Supply]);
        assert_eq!(
            registry.get(Location::Supply).unwrap().temperature(),
            Some(18.0)
        );
        assert!(!registry.get(Location::MixedAir).unwrap().needs_processed());
    }

    #[test]
    fn test_update_unknown_topic_is_sensor_not_found() {
        let mut registry = registry();
        let result = registry.update("p/sensor/attic_temperature/state", Reading::Temperature(1.0));
        assert!(matches!(result, Err(ControllerError::SensorNotFound { .. })));
        assert!(!registry.needs_processed());
    }

    #[test]
    fn test_repeated_update_is_idempotent() {
        let mut registry = registry();
        let topic = "p/sensor/mixed_air_humidity/state";

        assert!(registry.update(topic, Reading::Humidity(40.0)).unwrap());
        registry.has_processed(Location::MixedAir).unwrap();

        assert!(!registry.update(topic, Reading::Humidity(40.0)).unwrap());
        assert!(!registry.needs_processed());
    }

    #[test]
    fn test_has_processed_unknown_location() {
        let mut registry = registry();
        let result = registry.has_processed(Location::Return);
        assert!(matches!(
            result,
            Err(ControllerError::UnknownLocation {
                location: Location::Return
            })
        ));
    }

    #[test]
    fn test_aggregate_needs_processed() {
        let mut registry = registry();
        assert!(!registry.needs_processed());

        registry
            .update("p/sensor/mixed_air_temperature/state", Reading::Temperature(20.0))
            .unwrap();
        registry
            .update("p/sensor/supply_humidity/state", Reading::Humidity(30.0))
            .unwrap();
        assert_eq!(registry.dirty().len(), 2);

        registry.has_processed(Location::MixedAir).unwrap();
        assert!(registry.needs_processed());
        registry.has_processed(Location::Supply).unwrap();
        assert!(!registry.needs_processed());
    }
}
