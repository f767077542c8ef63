//! Round-log volume per GOST 2708-75
//!
//! The log is modelled as a cylinder of the measured top diameter:
//!
//! `V = π × (d / 2)² × L × k`
//!
//! Where:
//! - d = diameter in meters (input is centimeters)
//! - L = length in meters
//! - k = correction factor for bark and irregularity (0.95)
//!
//! The result is rounded once, at the end, to 3 decimal places (half-up).

use crate::config::defaults::{GOST_CORRECTION_FACTOR, VOLUME_DECIMAL_PLACES};

/// Calculator input errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculationError {
    #[error("invalid measurement: diameter {diameter_cm} cm, length {length_m} m")]
    InvalidMeasurement { diameter_cm: f64, length_m: f64 },
}

/// Volume calculator with a fixed correction factor.
///
/// Holds no mutable state, so identical inputs always give bit-identical
/// output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCalculator {
    correction_factor: f64,
}

impl Default for VolumeCalculator {
    fn default() -> Self {
        Self::gost()
    }
}

impl VolumeCalculator {
    /// Calculator using the GOST 2708-75 factor.
    pub const fn gost() -> Self {
        Self {
            correction_factor: GOST_CORRECTION_FACTOR,
        }
    }

    /// Calculator with a custom correction factor (e.g. per-standard tables).
    pub const fn with_correction_factor(correction_factor: f64) -> Self {
        Self { correction_factor }
    }

    pub fn correction_factor(&self) -> f64 {
        self.correction_factor
    }

    /// Volume in m³ for a log of `diameter_cm` × `length_m`.
    ///
    /// A length of exactly zero returns `0.0`; some flows use it as a
    /// placeholder before the length is known.
    pub fn calculate(&self, diameter_cm: f64, length_m: f64) -> Result<f64, CalculationError> {
        let invalid = || CalculationError::InvalidMeasurement {
            diameter_cm,
            length_m,
        };

        if !diameter_cm.is_finite() || !length_m.is_finite() || diameter_cm <= 0.0 {
            return Err(invalid());
        }
        if length_m == 0.0 {
            return Ok(0.0);
        }
        if length_m < 0.0 {
            return Err(invalid());
        }

        let radius_m = diameter_cm / 100.0 / 2.0;
        let raw = std::f64::consts::PI * radius_m * radius_m * length_m * self.correction_factor;

        Ok(round_half_up(raw, VOLUME_DECIMAL_PLACES))
    }
}

/// Volume with the standard GOST factor.
pub fn calculate_volume(diameter_cm: f64, length_m: f64) -> Result<f64, CalculationError> {
    VolumeCalculator::gost().calculate(diameter_cm, length_m)
}

/// Round to `places` decimals, ties away from zero (half-up for positives).
pub fn round_half_up(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
