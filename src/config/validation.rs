//! Non-fatal config checks.
//!
//! `validate_unknown_keys` runs on the raw document before the typed parse
//! and flags misspelled keys, which serde would otherwise drop silently.
//! `validate_ranges` runs on the parsed config and flags legal but unusual
//! limits. Neither ever rejects a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    fn unknown_key(field: String, known: &HashSet<&str>) -> Self {
        Self {
            suggestion: suggest_correction(&field, known),
            message: format!("Unknown config key '{field}'"),
            field,
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.suggestion {
            Some(key) => write!(f, "{} (did you mean '{key}'?)", self.message),
            None => f.write_str(&self.message),
        }
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for QcConfig.
///
/// Maintained by hand to match the struct hierarchy in qc_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [lab]
        "lab",
        "lab.name",
        // [rules]
        "rules",
        "rules.warning_limit_sd",
        "rules.reject_limit_sd",
        "rules.range_limit_sd",
        "rules.shift_limit_sd",
        "rules.shift_points",
        "rules.trend_points",
        "rules.two_two_s",
        "rules.range_four_s",
        "rules.four_one_s",
        "rules.ten_x",
        // [ingestion]
        "ingestion",
        "ingestion.history_limit",
        // [storage]
        "storage",
        "storage.db_path",
        "storage.baseline_path",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// Unknown Keys
// ============================================================================

/// Every dotted key path in a TOML document, sections included, sorted.
///
/// `[rules]\nten_x = false` yields `["rules", "rules.ten_x"]`.
pub fn dotted_keys(document: &toml::Value) -> Vec<String> {
    let mut keys = Vec::new();
    let mut tables: Vec<(String, &toml::Table)> = Vec::new();
    if let Some(root) = document.as_table() {
        tables.push((String::new(), root));
    }

    while let Some((prefix, table)) = tables.pop() {
        for (name, child) in table {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            if let Some(nested) = child.as_table() {
                tables.push((path.clone(), nested));
            }
            keys.push(path);
        }
    }

    keys.sort_unstable();
    keys
}

/// Insertions, deletions and substitutions needed to turn `a` into `b`.
fn edit_distance(a: &str, b: &str) -> usize {
    let target: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=target.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        // row[j] still holds the previous row until overwritten
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, &cb) in target.iter().enumerate() {
            let above = row[j + 1];
            row[j + 1] = if ca == cb {
                diagonal
            } else {
                1 + diagonal.min(above).min(row[j])
            };
            diagonal = above;
        }
    }

    row[target.len()]
}

/// Closest known key within edit distance 3 of `unknown`.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (edit_distance(unknown, k), k))
        .filter(|&(dist, _)| dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

/// Warnings for every key of `raw_toml` that `QcConfig` does not define.
///
/// A document that is not valid TOML yields no warnings here; the typed
/// parse reports it.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(document) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();
    for key in dotted_keys(&document) {
        if !known.contains(key.as_str()) {
            warnings.push(ValidationWarning::unknown_key(key, &known));
        }
    }
    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Warn about limits that are legal but unusual for clinical QC.
pub fn validate_ranges(config: &super::QcConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let r = &config.rules;

    if r.warning_limit_sd < 1.0 || r.warning_limit_sd > 3.0 {
        warnings.push(ValidationWarning {
            field: "rules.warning_limit_sd".to_string(),
            message: format!(
                "warning_limit_sd = {:.2} is outside the usual range (1-3 SD)",
                r.warning_limit_sd
            ),
            suggestion: None,
        });
    }

    if r.reject_limit_sd > 5.0 {
        warnings.push(ValidationWarning {
            field: "rules.reject_limit_sd".to_string(),
            message: format!(
                "reject_limit_sd = {:.2} is unusually wide (> 5 SD)",
                r.reject_limit_sd
            ),
            suggestion: None,
        });
    }

    let needed = r.shift_points.max(r.trend_points).saturating_sub(1);
    if config.ingestion.history_limit < needed {
        warnings.push(ValidationWarning {
            field: "ingestion.history_limit".to_string(),
            message: format!(
                "history_limit = {} is shorter than the {} prior points the widest rule window needs",
                config.ingestion.history_limit, needed
            ),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================
