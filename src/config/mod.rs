//! Tally Configuration Module
//!
//! Per-device configuration loaded from TOML, replacing hardcoded limits and
//! sync timings with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `TIMBER_TALLY_CONFIG` environment variable (path to TOML file)
//! 2. `timber_tally.toml` in the current working directory
//! 3. Built-in defaults (GOST 2708-75 ranges and factor)
//!
//! The config is passed explicitly to the components that need it; the
//! calculation path never reads ambient state.

mod tally_config;
pub mod defaults;
pub mod validation;

pub use tally_config::*;
