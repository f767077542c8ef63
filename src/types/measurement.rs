//! Single round-log measurement

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calculation::{CalculationError, VolumeCalculator};

/// One measured log: diameter, length and the derived volume.
///
/// Fields are private so the volume can only come from the calculator.
/// A measurement never changes after it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    id: Uuid,
    /// Top diameter in centimeters
    diameter_cm: f64,
    /// Log length in meters
    length_m: f64,
    /// Volume in cubic meters, rounded to 3 decimals
    volume_m3: f64,
    timestamp: DateTime<Utc>,
}

impl Measurement {
    /// Measure a log, computing its volume with `calculator`.
    ///
    /// Callers are expected to have validated the inputs already; this only
    /// fails on non-finite or non-positive values.
    pub fn measure(
        diameter_cm: f64,
        length_m: f64,
        calculator: &VolumeCalculator,
    ) -> Result<Self, CalculationError> {
        let volume_m3 = calculator.calculate(diameter_cm, length_m)?;
        Ok(Self {
            id: Uuid::new_v4(),
            diameter_cm,
            length_m,
            volume_m3,
            timestamp: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn diameter_cm(&self) -> f64 {
        self.diameter_cm
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }

    pub fn volume_m3(&self) -> f64 {
        self.volume_m3
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
