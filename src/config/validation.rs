//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// Returns the complete set of valid dotted key paths for TallyConfig.
///
/// Maintained by hand to match the struct hierarchy in tally_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [site]
        "site",
        "site.device_id",
        "site.default_operator",
        "site.default_standard",
        // [limits]
        "limits",
        "limits.min_diameter_cm",
        "limits.max_diameter_cm",
        "limits.min_length_m",
        "limits.max_length_m",
        // [calculation]
        "calculation",
        "calculation.correction_factor",
        // [storage]
        "storage",
        "storage.data_dir",
        "storage.flush_on_commit",
        // [sync]
        "sync",
        "sync.interval_secs",
        "sync.upload_timeout_secs",
        "sync.auto_retry",
        "sync.max_auto_retries",
        "sync.max_backoff_exponent",
        "sync.max_backoff_secs",
        "sync.jitter_secs",
        "sync.simulated_failure_rate",
        "sync.simulated_latency_ms",
    ];
    keys.iter().copied().collect()
}

/// Collect every dotted key path in a TOML tree.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Closest known key within edit distance 3, if any.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        // tie-break on the key so the suggestion is stable across runs
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

/// Warn about keys the config does not know.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("intervl_secs", "interval_secs"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [sync]
            interval_secs = 30
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"sync".to_string()));
        assert!(keys.contains(&"sync.interval_secs".to_string()));
    }

    #[test]
    fn test_known_keys_cover_default_config() {
        let rendered = super::super::TallyConfig::default().to_toml().unwrap();
        let value: toml::Value = rendered.parse().unwrap();
        let known = known_config_keys();
        for key in walk_toml_keys(&value, "") {
            assert!(known.contains(key.as_str()), "key '{key}' missing from known_config_keys");
        }
    }

    #[test]
    fn test_no_suggestion_for_distant_key() {
        let known = known_config_keys();
        assert_eq!(suggest_correction("completely.unrelated.thing", &known), None);
    }
}
