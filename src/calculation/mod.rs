//! Measurement-to-volume calculation
//!
//! Synchronous and side-effect free: validation first, then the GOST
//! cylinder formula. Nothing here touches storage or the clock.

mod validator;
mod volume;

pub use validator::{validate, InputField, MeasurementValidator, Violation};
pub use volume::{calculate_volume, round_half_up, CalculationError, VolumeCalculator};
