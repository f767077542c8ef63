//! Config Validation Tests
//!
//! Typo detection for unknown keys and cross-field range validation,
//! exercised independently from storage and sync.

use std::io::Write;

use timber_tally::config::validation::{
    known_config_keys, suggest_correction, validate_unknown_keys,
};
use timber_tally::config::{ConfigError, TallyConfig};

// ============================================================================
// Typo Detection Tests
// ============================================================================

#[test]
fn typo_in_sync_section_warns_with_suggestion() {
    let toml_str = r#"
[sync]
intervl_secs = 30
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("intervl_secs"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("sync.interval_secs"));
}

#[test]
fn typo_in_site_section_warns() {
    let toml_str = r#"
[site]
devce_id = "tally-07"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("site.device_id"));
    assert!(warnings[0].to_string().contains("did you mean 'site.device_id'"));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[site]
device_id = "tally-07"
default_operator = "petrov"
default_standard = "GOST-2708-75"

[limits]
min_diameter_cm = 8.0
max_diameter_cm = 100.0
min_length_m = 1.0
max_length_m = 12.0

[calculation]
correction_factor = 0.95

[storage]
data_dir = "/var/lib/timber-tally"
flush_on_commit = false

[sync]
interval_secs = 120
upload_timeout_secs = 20
auto_retry = true
max_auto_retries = 3
max_backoff_exponent = 4
max_backoff_secs = 600
jitter_secs = 10
simulated_failure_rate = 0.1
simulated_latency_ms = 50
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(
        warnings.is_empty(),
        "Valid config should produce 0 warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn unknown_section_warns() {
    let toml_str = r#"
[network]
endpoint = "https://example.invalid"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(!warnings.is_empty());
    assert!(warnings.iter().any(|w| w.field == "network"));
}

#[test]
fn multiple_typos_all_warned() {
    let toml_str = r#"
[site]
devce_id = "x"

[limits]
max_diamter_cm = 90.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 2, "Expected 2 warnings for 2 typos, got {}", warnings.len());
}

#[test]
fn empty_toml_produces_zero_warnings() {
    assert!(validate_unknown_keys("").is_empty());
}

#[test]
fn known_keys_set_is_complete() {
    // Every key of the serialized default config must be known
    let toml_str = TallyConfig::default().to_toml().expect("Default config should serialize");
    let warnings = validate_unknown_keys(&toml_str);
    assert!(
        warnings.is_empty(),
        "Default config serialization should produce 0 unknown-key warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn suggest_correction_returns_none_for_garbage() {
    let known = known_config_keys();
    assert!(suggest_correction("zzz_completely_invalid_xyz_12345", &known).is_none());
}

// ============================================================================
// Range Validation Tests
// ============================================================================

#[test]
fn default_config_is_valid() {
    assert!(TallyConfig::default().validate().is_ok());
}

#[test]
fn correction_factor_above_one_is_error() {
    let mut config = TallyConfig::default();
    config.calculation.correction_factor = 1.5;
    match config.validate() {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("correction_factor")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn inverted_ranges_report_every_problem() {
    let mut config = TallyConfig::default();
    config.limits.min_diameter_cm = 130.0;
    config.limits.min_length_m = 20.0;
    config.sync.interval_secs = 0;
    match config.validate() {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "got {errors:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn nan_bounds_are_rejected() {
    let mut config = TallyConfig::default();
    config.limits.max_length_m = f64::NAN;
    assert!(config.validate().is_err());
}

// ============================================================================
// File Loading Tests
// ============================================================================

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_fills_defaults() {
    let file = write_config(
        r#"
[site]
device_id = "tally-07"

[sync]
auto_retry = true
"#,
    );
    let config = TallyConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.site.device_id, "tally-07");
    assert!(config.sync.auto_retry);
    assert_eq!(config.sync.interval_secs, 60);
    assert_eq!(config.calculation.correction_factor, 0.95);
    assert_eq!(config.limits, TallyConfig::default().limits);
}

#[test]
fn invalid_values_in_file_fail_to_load() {
    let file = write_config(
        r#"
[calculation]
correction_factor = 0.0
"#,
    );
    assert!(matches!(
        TallyConfig::load_from_file(file.path()),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn malformed_toml_is_parse_error() {
    let file = write_config("[site\ndevice_id = ");
    assert!(matches!(TallyConfig::load_from_file(file.path()), Err(ConfigError::Parse(..))));
}

#[test]
fn toml_round_trip_preserves_config() {
    let mut config = TallyConfig::default();
    config.site.device_id = "tally-99".to_string();
    config.sync.simulated_failure_rate = 0.25;
    let rendered = config.to_toml().unwrap();
    let parsed: TallyConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
