//! Measurement range validation
//!
//! Checks operator input against the legal diameter and length ranges before
//! it reaches the calculator. Violations are collected, never thrown: both
//! bounds are always checked so the operator sees every problem at once.

use serde::Serialize;

use crate::config::defaults::{MAX_DIAMETER_CM, MAX_LENGTH_M, MIN_DIAMETER_CM, MIN_LENGTH_M};
use crate::config::LimitsConfig;

/// A single rejected input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    DiameterOutOfRange { value: f64, min: f64, max: f64 },
    LengthOutOfRange { value: f64, min: f64, max: f64 },
    /// Raw input could not be read as a number
    NotANumber { field: InputField, input: String },
}

/// Which operator input a violation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputField {
    Diameter,
    Length,
}

impl std::fmt::Display for InputField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputField::Diameter => write!(f, "diameter"),
            InputField::Length => write!(f, "length"),
        }
    }
}

impl Violation {
    pub fn field(&self) -> InputField {
        match self {
            Violation::DiameterOutOfRange { .. } => InputField::Diameter,
            Violation::LengthOutOfRange { .. } => InputField::Length,
            Violation::NotANumber { field, .. } => *field,
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::DiameterOutOfRange { value, min, max } => {
                write!(f, "diameter {value} cm is outside {min}..={max} cm")
            }
            Violation::LengthOutOfRange { value, min, max } => {
                write!(f, "length {value} m is outside {min}..={max} m")
            }
            Violation::NotANumber { field, input } => {
                write!(f, "{field} '{input}' is not a number")
            }
        }
    }
}

/// Legal measurement ranges (inclusive).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementValidator {
    min_diameter_cm: f64,
    max_diameter_cm: f64,
    min_length_m: f64,
    max_length_m: f64,
}

impl Default for MeasurementValidator {
    fn default() -> Self {
        Self {
            min_diameter_cm: MIN_DIAMETER_CM,
            max_diameter_cm: MAX_DIAMETER_CM,
            min_length_m: MIN_LENGTH_M,
            max_length_m: MAX_LENGTH_M,
        }
    }
}

impl MeasurementValidator {
    pub fn from_config(limits: &LimitsConfig) -> Self {
        Self {
            min_diameter_cm: limits.min_diameter_cm,
            max_diameter_cm: limits.max_diameter_cm,
            min_length_m: limits.min_length_m,
            max_length_m: limits.max_length_m,
        }
    }

    /// Every range violation for the pair. Empty means the input is usable.
    ///
    /// NaN is outside every range and is reported like any other bad value.
    pub fn validate(&self, diameter_cm: f64, length_m: f64) -> Vec<Violation> {
        let mut violations = Vec::new();

        if !(self.min_diameter_cm..=self.max_diameter_cm).contains(&diameter_cm) {
            violations.push(Violation::DiameterOutOfRange {
                value: diameter_cm,
                min: self.min_diameter_cm,
                max: self.max_diameter_cm,
            });
        }
        if !(self.min_length_m..=self.max_length_m).contains(&length_m) {
            violations.push(Violation::LengthOutOfRange {
                value: length_m,
                min: self.min_length_m,
                max: self.max_length_m,
            });
        }

        violations
    }

    /// Parse raw operator strings and validate them.
    ///
    /// Accepts a comma as the decimal separator ("25,5").
    pub fn validate_raw(&self, diameter: &str, length: &str) -> Result<(f64, f64), Vec<Violation>> {
        let d = parse_number(diameter, InputField::Diameter);
        let l = parse_number(length, InputField::Length);

        match (d, l) {
            (Ok(d), Ok(l)) => {
                let violations = self.validate(d, l);
                if violations.is_empty() {
                    Ok((d, l))
                } else {
                    Err(violations)
                }
            }
            (d, l) => Err([d.err(), l.err()].into_iter().flatten().collect()),
        }
    }
}

/// Validate against the default ranges.
pub fn validate(diameter_cm: f64, length_m: f64) -> Vec<Violation> {
    MeasurementValidator::default().validate(diameter_cm, length_m)
}

fn parse_number(raw: &str, field: InputField) -> Result<f64, Violation> {
    let normalized = raw.trim().replace(',', ".");
    normalized
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Violation::NotANumber {
            field,
            input: raw.to_string(),
        })
}
