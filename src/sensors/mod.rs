//! Sensor registry and dirty tracking
//!
//! - [`tracked`] - change-tracked values with injectable equality
//! - [`sensor`] - locations, topic naming, and the temperature/humidity sensor
//! - [`registry`] - topic routing and the per-sensor publish state
//! - [`decode`] - decimal payload parsing and encoding

pub mod decode;
pub mod registry;
pub mod sensor;
pub mod tracked;

pub use decode::{decode_reading, encode_value};
pub use registry::SensorRegistry;
pub use sensor::{DerivedReading, Location, Reading, ReadingKind, Sensor, SensorTopics};
pub use tracked::TrackedValue;
