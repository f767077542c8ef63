//! Tally Configuration - device, limits, calculation, storage and sync settings
//!
//! Each struct implements `Default` with the values from `defaults.rs`, so a
//! device with no config file behaves exactly like the built-in standard.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable holding an explicit config path
pub const CONFIG_ENV_VAR: &str = "TIMBER_TALLY_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "timber_tally.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a tally device.
///
/// Load with `TallyConfig::load()` which searches:
/// 1. `$TIMBER_TALLY_CONFIG` env var
/// 2. `./timber_tally.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Device identification and batch defaults
    #[serde(default)]
    pub site: SiteConfig,

    /// Legal measurement ranges
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Volume formula tuning
    #[serde(default)]
    pub calculation: CalculationConfig,

    /// Local database
    #[serde(default)]
    pub storage: StorageConfig,

    /// Upload queue draining
    #[serde(default)]
    pub sync: SyncConfig,
}

impl TallyConfig {
    /// Load configuration using the standard search order:
    /// 1. `$TIMBER_TALLY_CONFIG` environment variable
    /// 2. `./timber_tally.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(
                            path = %p.display(),
                            device = %config.site.device_id,
                            "Loaded tally config from {}",
                            CONFIG_ENV_VAR
                        );
                        return config;
                    }
                    Err(e) => {
                        warn!(
                            path = %p.display(),
                            error = %e,
                            "Failed to load config from {}, falling back",
                            CONFIG_ENV_VAR
                        );
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./timber_tally.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(
                        device = %config.site.device_id,
                        "Loaded tally config from ./{}",
                        LOCAL_CONFIG_FILE
                    );
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found — using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Unknown keys are warnings only
        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the effective config back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let l = &self.limits;
        Self::check_range(l.min_diameter_cm, l.max_diameter_cm, "limits.diameter_cm", &mut errors);
        Self::check_range(l.min_length_m, l.max_length_m, "limits.length_m", &mut errors);

        let k = self.calculation.correction_factor;
        if !k.is_finite() || k <= 0.0 || k > 1.0 {
            errors.push(format!(
                "calculation.correction_factor ({k}) must be in (0, 1]"
            ));
        }

        if self.site.device_id.trim().is_empty() {
            errors.push("site.device_id must not be empty".to_string());
        }

        let s = &self.sync;
        if s.interval_secs == 0 {
            errors.push("sync.interval_secs must be > 0".to_string());
        }
        if s.upload_timeout_secs == 0 {
            errors.push("sync.upload_timeout_secs must be > 0".to_string());
        }
        if s.max_backoff_exponent > 16 {
            errors.push(format!(
                "sync.max_backoff_exponent ({}) must be <= 16",
                s.max_backoff_exponent
            ));
        }
        if !(0.0..=1.0).contains(&s.simulated_failure_rate) {
            errors.push(format!(
                "sync.simulated_failure_rate ({}) must be in [0, 1]",
                s.simulated_failure_rate
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_range(min: f64, max: f64, name: &str, errors: &mut Vec<String>) {
        // NaN/Inf comparisons silently pass — catch them explicitly
        if !min.is_finite() || !max.is_finite() {
            errors.push(format!("{name}: bounds must be finite (got min={min}, max={max})"));
            return;
        }
        if min <= 0.0 {
            errors.push(format!("{name}: min ({min}) must be > 0"));
        }
        if min >= max {
            errors.push(format!("{name}: min ({min}) must be < max ({max})"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Site
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Identifies this device in sync payloads
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Operator recorded when none is given on the command line
    #[serde(default)]
    pub default_operator: String,

    #[serde(default = "default_standard")]
    pub default_standard: String,
}

fn default_device_id() -> String {
    "tally-01".to_string()
}

fn default_standard() -> String {
    defaults::DEFAULT_STANDARD_ID.to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            default_operator: String::new(),
            default_standard: default_standard(),
        }
    }
}

// ============================================================================
// Limits
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_min_diameter")]
    pub min_diameter_cm: f64,
    #[serde(default = "default_max_diameter")]
    pub max_diameter_cm: f64,
    #[serde(default = "default_min_length")]
    pub min_length_m: f64,
    #[serde(default = "default_max_length")]
    pub max_length_m: f64,
}

fn default_min_diameter() -> f64 {
    defaults::MIN_DIAMETER_CM
}

fn default_max_diameter() -> f64 {
    defaults::MAX_DIAMETER_CM
}

fn default_min_length() -> f64 {
    defaults::MIN_LENGTH_M
}

fn default_max_length() -> f64 {
    defaults::MAX_LENGTH_M
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_diameter_cm: default_min_diameter(),
            max_diameter_cm: default_max_diameter(),
            min_length_m: default_min_length(),
            max_length_m: default_max_length(),
        }
    }
}

// ============================================================================
// Calculation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// Multiplier on the raw cylinder volume
    #[serde(default = "default_correction_factor")]
    pub correction_factor: f64,
}

fn default_correction_factor() -> f64 {
    defaults::GOST_CORRECTION_FACTOR
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            correction_factor: default_correction_factor(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// fsync after every commit and queue transition
    #[serde(default = "default_true")]
    pub flush_on_commit: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DEFAULT_DATA_DIR)
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            flush_on_commit: true,
        }
    }
}

// ============================================================================
// Sync
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// Let the sync loop re-queue failed items on its own
    #[serde(default)]
    pub auto_retry: bool,
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,
    #[serde(default = "default_max_backoff_exponent")]
    pub max_backoff_exponent: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
    /// Probability that the simulated uplink rejects an upload
    #[serde(default)]
    pub simulated_failure_rate: f64,
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,
}

fn default_interval_secs() -> u64 {
    defaults::SYNC_INTERVAL_SECS
}

fn default_upload_timeout_secs() -> u64 {
    defaults::UPLOAD_TIMEOUT_SECS
}

fn default_max_auto_retries() -> u32 {
    defaults::MAX_AUTO_RETRIES
}

fn default_max_backoff_exponent() -> u32 {
    defaults::MAX_BACKOFF_EXPONENT
}

fn default_max_backoff_secs() -> u64 {
    defaults::MAX_BACKOFF_SECS
}

fn default_jitter_secs() -> u64 {
    defaults::SYNC_JITTER_SECS
}

fn default_simulated_latency_ms() -> u64 {
    defaults::SIMULATED_LATENCY_MS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            auto_retry: false,
            max_auto_retries: default_max_auto_retries(),
            max_backoff_exponent: default_max_backoff_exponent(),
            max_backoff_secs: default_max_backoff_secs(),
            jitter_secs: default_jitter_secs(),
            simulated_failure_rate: 0.0,
            simulated_latency_ms: default_simulated_latency_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
