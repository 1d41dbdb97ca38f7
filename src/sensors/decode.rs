//! Payload codec for sensor topics
//!
//! Payloads are plain UTF-8 decimal strings (`"75.123"`), not JSON.

use super::sensor::{Reading, ReadingKind};
use crate::error::ControllerError;

/// Parse a UTF-8 decimal payload into a float
fn parse_decimal(payload: &[u8]) -> Option<f64> {
    std::str::from_utf8(payload).ok()?.trim().parse::<f64>().ok()
}

/// Parse a dry bulb temperature payload, in degrees Celsius
pub fn decode_temperature(topic: &str, payload: &[u8]) -> Result<f64, ControllerError> {
    parse_decimal(payload).ok_or_else(|| ControllerError::decoding(topic, payload))
}

/// Parse a relative humidity payload, in percent
///
/// Any number is accepted, including readings a drifting sensor reports
/// outside 0..=100 and NaN. Such values are stored like any other reading;
/// the psychrometric functions return `None` for them, so nothing derived
/// is published until the sensor reports a usable value again.
pub fn decode_humidity(topic: &str, payload: &[u8]) -> Result<f64, ControllerError> {
    parse_decimal(payload).ok_or_else(|| ControllerError::decoding(topic, payload))
}

/// Decode a reading of the given kind
pub fn decode_reading(
    kind: ReadingKind,
    topic: &str,
    payload: &[u8],
) -> Result<Reading, ControllerError> {
    match kind {
        ReadingKind::Temperature => decode_temperature(topic, payload).map(Reading::Temperature),
        ReadingKind::Humidity => decode_humidity(topic, payload).map(Reading::Humidity),
    }
}

/// Round to two decimal places
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Encode a derived value for publishing
///
/// Whole numbers keep one decimal place (`"50.0"`), everything else is
/// printed with at most two.
pub fn encode_value(value: f64) -> String {
    let rounded = round_to_hundredths(value);
    if rounded.fract() == 0.0 {
        format!("{rounded:.1}")
    } else {
        rounded.to_string()
    }
}
