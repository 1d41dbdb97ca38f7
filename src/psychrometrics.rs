//! Psychrometric calculations
//!
//! The service only depends on the [`Psychrometrics`] trait. The bundled
//! implementation uses the Magnus approximation for saturation vapour pressure
//! and the standard atmosphere for barometric pressure at altitude.

/// Derived-value calculator
///
/// Both functions return `None` rather than failing when the inputs are NaN
/// or outside the range the formulas support.
pub trait Psychrometrics: Send + Sync {
    /// Dew point in degrees Celsius
    fn dew_point(&self, dry_bulb: f64, relative_humidity: f64) -> Option<f64>;

    /// Moist air enthalpy in kJ per kg of dry air
    fn enthalpy(&self, dry_bulb: f64, relative_humidity: f64, altitude_feet: f64) -> Option<f64>;
}

const MAGNUS_B: f64 = 17.62;
const MAGNUS_C: f64 = 243.12;
const FEET_TO_METERS: f64 = 0.3048;

/// Magnus-formula psychrometrics
#[derive(Debug, Clone, Copy, Default)]
pub struct MagnusPsychrometrics;

impl MagnusPsychrometrics {
    /// Saturation vapour pressure over water, in kPa
    fn saturation_pressure(dry_bulb: f64) -> f64 {
        0.61094 * ((MAGNUS_B * dry_bulb) / (MAGNUS_C + dry_bulb)).exp()
    }

    /// Barometric pressure at altitude, in kPa
    fn barometric_pressure(altitude_feet: f64) -> f64 {
        let meters = altitude_feet * FEET_TO_METERS;
        101.325 * (1.0 - 2.25577e-5 * meters).powf(5.2559)
    }

    fn valid_inputs(dry_bulb: f64, relative_humidity: f64) -> bool {
        dry_bulb.is_finite()
            && relative_humidity.is_finite()
            && relative_humidity > 0.0
            && relative_humidity <= 100.0
            && dry_bulb > -MAGNUS_C
    }
}

impl Psychrometrics for MagnusPsychrometrics {
    fn dew_point(&self, dry_bulb: f64, relative_humidity: f64) -> Option<f64> {
        if !Self::valid_inputs(dry_bulb, relative_humidity) {
            return None;
        }

        let gamma =
            (relative_humidity / 100.0).ln() + (MAGNUS_B * dry_bulb) / (MAGNUS_C + dry_bulb);
        let dew_point = MAGNUS_C * gamma / (MAGNUS_B - gamma);
        dew_point.is_finite().then_some(dew_point)
    }

    fn enthalpy(&self, dry_bulb: f64, relative_humidity: f64, altitude_feet: f64) -> Option<f64> {
        if !Self::valid_inputs(dry_bulb, relative_humidity) || !altitude_feet.is_finite() {
            return None;
        }

        let total_pressure = Self::barometric_pressure(altitude_feet);
        let vapour_pressure = relative_humidity / 100.0 * Self::saturation_pressure(dry_bulb);
        if !total_pressure.is_finite() || vapour_pressure >= total_pressure {
            return None;
        }

        let humidity_ratio = 0.621945 * vapour_pressure / (total_pressure - vapour_pressure);
        let enthalpy = 1.006 * dry_bulb + humidity_ratio * (2501.0 + 1.86 * dry_bulb);
        enthalpy.is_finite().then_some(enthalpy)
    }
}
