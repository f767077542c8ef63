//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery. Config structs use these as
//! their `Default` values.

// ============================================================================
// Measurement Limits
// ============================================================================

/// Smallest accepted top diameter (cm).
pub const MIN_DIAMETER_CM: f64 = 6.0;

/// Largest accepted top diameter (cm).
pub const MAX_DIAMETER_CM: f64 = 120.0;

/// Shortest accepted log (m).
pub const MIN_LENGTH_M: f64 = 0.5;

/// Longest accepted log (m).
pub const MAX_LENGTH_M: f64 = 15.0;

// ============================================================================
// Volume Calculation
// ============================================================================

/// GOST 2708-75 bark/irregularity correction applied to the cylinder volume.
pub const GOST_CORRECTION_FACTOR: f64 = 0.95;

/// Decimal places kept in a computed volume (m³).
pub const VOLUME_DECIMAL_PLACES: i32 = 3;

/// Standard recorded on batches when the operator does not pick one.
pub const DEFAULT_STANDARD_ID: &str = "GOST-2708-75";

// ============================================================================
// Storage
// ============================================================================

/// Default sled database directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

// ============================================================================
// Sync
// ============================================================================

/// How often the sync loop drains the queue (seconds).
pub const SYNC_INTERVAL_SECS: u64 = 60;

/// Upper bound on a single upload attempt (seconds).
pub const UPLOAD_TIMEOUT_SECS: u64 = 30;

/// Automatic retries the sync loop performs per item before leaving it to
/// the operator.
pub const MAX_AUTO_RETRIES: u32 = 5;

/// Maximum backoff multiplier exponent for sync retries.
///
/// `2^6 = 64× base interval`, capped at `MAX_BACKOFF_SECS`.
pub const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Ceiling on any computed backoff delay (seconds).
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Random jitter added to each sync loop sleep (seconds).
pub const SYNC_JITTER_SECS: u64 = 5;

/// Simulated uplink round-trip latency (ms).
pub const SIMULATED_LATENCY_MS: u64 = 200;
