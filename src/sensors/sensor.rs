//! Temperature and humidity sensors
//!
//! Each physical location carries one temperature/humidity pair. Its four
//! topic names are derived from the location and a configurable prefix:
//! `{prefix}/sensor/{location}_{kind}/state`.

use super::tracked::TrackedValue;
use crate::psychrometrics::Psychrometrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical locations a sensor can be installed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    MixedAir,
    PostCoil,
    Return,
    Supply,
}

impl Location {
    pub fn all() -> &'static [Location] {
        &[
            Location::MixedAir,
            Location::PostCoil,
            Location::Return,
            Location::Supply,
        ]
    }

    /// Identifier used inside topic names
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::MixedAir => "mixed_air",
            Location::PostCoil => "post_coil",
            Location::Return => "return",
            Location::Supply => "supply",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::all()
            .iter()
            .copied()
            .find(|location| location.as_str() == s)
            .ok_or_else(|| format!("Unknown sensor location '{s}'"))
    }
}

/// Topics a sensor listens on and publishes to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorTopics {
    pub temperature: String,
    pub humidity: String,
    pub dew_point: String,
    pub enthalpy: String,
}

impl SensorTopics {
    /// Build the topic set for a location, dropping a trailing `/` from the prefix
    pub fn new(prefix: &str, location: Location) -> Self {
        let prefix = prefix.strip_suffix('/').unwrap_or(prefix);
        let topic = |kind: &str| format!("{prefix}/sensor/{location}_{kind}/state");

        Self {
            temperature: topic("temperature"),
            humidity: topic("humidity"),
            dew_point: topic("dew_point"),
            enthalpy: topic("enthalpy"),
        }
    }

    /// Whether the topic is one of this sensor's inbound topics
    pub fn owns(&self, topic: &str) -> bool {
        self.temperature == topic || self.humidity == topic
    }
}

/// Which reading an inbound topic carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Temperature,
    Humidity,
}

impl ReadingKind {
    /// Classify an inbound topic by its name
    pub fn classify(topic: &str) -> Option<Self> {
        if topic.contains("temperature") {
            Some(ReadingKind::Temperature)
        } else if topic.contains("humidity") {
            Some(ReadingKind::Humidity)
        } else {
            None
        }
    }
}

/// A decoded sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Dry bulb temperature in degrees Celsius
    Temperature(f64),
    /// Relative humidity in percent
    Humidity(f64),
}

/// Derived values for a sensor; either scalar may be unavailable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedReading {
    pub dew_point: Option<f64>,
    pub enthalpy: Option<f64>,
}

/// A temperature and humidity sensor at one location
#[derive(Debug, Clone)]
pub struct Sensor {
    location: Location,
    altitude_feet: f64,
    topics: SensorTopics,
    temperature: TrackedValue<f64>,
    humidity: TrackedValue<f64>,
}

impl Sensor {
    pub fn new(location: Location, prefix: &str, altitude_feet: f64) -> Self {
        Self {
            location,
            altitude_feet,
            topics: SensorTopics::new(prefix, location),
            temperature: TrackedValue::default(),
            humidity: TrackedValue::default(),
        }
    }

    /// The sensor id is its location
    pub fn id(&self) -> Location {
        self.location
    }

    pub fn altitude_feet(&self) -> f64 {
        self.altitude_feet
    }

    pub fn topics(&self) -> &SensorTopics {
        &self.topics
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature.value()
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity.value()
    }

    /// Apply a reading; returns whether the sensor became dirty from it
    pub fn apply(&mut self, reading: Reading) -> bool {
        match reading {
            Reading::Temperature(value) => self.temperature.set(Some(value)),
            Reading::Humidity(value) => self.humidity.set(Some(value)),
        }
    }

    /// True when either reading changed since the last publish
    pub fn needs_processed(&self) -> bool {
        self.temperature.needs_processed() || self.humidity.needs_processed()
    }

    /// Clear both dirty flags
    pub fn has_processed(&mut self) {
        self.temperature.mark_processed();
        self.humidity.mark_processed();
    }

    /// Compute dew point and enthalpy from the current readings
    ///
    /// Returns `None` when either reading is missing or NaN.
    pub fn derived(&self, psychrometrics: &dyn Psychrometrics) -> Option<DerivedReading> {
        let dry_bulb = self.temperature().filter(|v| !v.is_nan())?;
        let humidity = self.humidity().filter(|v| !v.is_nan())?;

        Some(DerivedReading {
            dew_point: psychrometrics.dew_point(dry_bulb, humidity),
            enthalpy: psychrometrics.enthalpy(dry_bulb, humidity, self.altitude_feet),
        })
    }
}
