//! QC Configuration - rule limits, ingestion and storage settings as TOML
//!
//! Each section implements `Default` with the conventional Westgard values,
//! so the engine behaves identically with or without a config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::rules::{
    DEFAULT_RANGE_LIMIT_SD, DEFAULT_REJECT_LIMIT_SD, DEFAULT_SHIFT_LIMIT_SD, DEFAULT_SHIFT_POINTS,
    DEFAULT_TREND_POINTS, DEFAULT_WARNING_LIMIT_SD,
};

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "QC_ENGINE_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "qc_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a laboratory deployment.
///
/// Load with `QcConfig::load()` which searches:
/// 1. `$QC_ENGINE_CONFIG`
/// 2. `./qc_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcConfig {
    /// Laboratory identification
    #[serde(default)]
    pub lab: LabInfo,

    /// Westgard rule limits and toggles
    #[serde(default)]
    pub rules: RuleConfig,

    /// Batch ingestion behaviour
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// On-disk locations
    #[serde(default)]
    pub storage: StorageConfig,
}

impl QcConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        Self::load_first(&Self::search_paths())
    }

    /// Candidate files in search order, labelled for the logs.
    fn search_paths() -> Vec<(&'static str, PathBuf)> {
        let mut paths = Vec::with_capacity(2);
        if let Some(explicit) = std::env::var_os(CONFIG_ENV_VAR) {
            paths.push((CONFIG_ENV_VAR, PathBuf::from(explicit)));
        }
        paths.push(("working directory", PathBuf::from(DEFAULT_CONFIG_FILE)));
        paths
    }

    /// The first candidate that exists and validates, else the defaults.
    fn load_first(paths: &[(&str, PathBuf)]) -> Self {
        for (source, path) in paths {
            if !path.is_file() {
                debug!(source = %source, path = %path.display(), "No QC config file");
                continue;
            }
            match Self::load_from_file(path) {
                Ok(config) => {
                    info!(
                        source = %source,
                        path = %path.display(),
                        lab = %config.lab.name,
                        "Loaded QC config"
                    );
                    return config;
                }
                Err(e) => warn!(source = %source, error = %e, "Skipping unusable QC config"),
            }
        }

        info!("Using built-in QC config defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents)
            .map_err(|e| match e {
                ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
                other => other,
            })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are logged as warnings and never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;

        for w in super::validation::validate_ranges(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "QC config saved");
        Ok(())
    }

    /// Validate limits for internal consistency.
    ///
    /// Rules:
    /// - All SD limits must be finite and > 0
    /// - Reject limit must be > warning limit
    /// - Shift and trend windows need at least 2 points
    /// - History limit must be >= 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.rules;
        let mut errors: Vec<String> = Vec::new();

        for (name, limit) in [
            ("rules.warning_limit_sd", r.warning_limit_sd),
            ("rules.reject_limit_sd", r.reject_limit_sd),
            ("rules.range_limit_sd", r.range_limit_sd),
            ("rules.shift_limit_sd", r.shift_limit_sd),
        ] {
            Self::check_positive(limit, name, &mut errors);
        }

        if r.warning_limit_sd.is_finite()
            && r.reject_limit_sd.is_finite()
            && r.reject_limit_sd <= r.warning_limit_sd
        {
            errors.push(format!(
                "rules: reject_limit_sd ({:.3}) must be > warning_limit_sd ({:.3})",
                r.reject_limit_sd, r.warning_limit_sd
            ));
        }

        if r.shift_points < 2 {
            errors.push(format!(
                "rules.shift_points = {} must be >= 2",
                r.shift_points
            ));
        }
        if r.trend_points < 2 {
            errors.push(format!(
                "rules.trend_points = {} must be >= 2",
                r.trend_points
            ));
        }

        if self.ingestion.history_limit == 0 {
            errors.push("ingestion.history_limit must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass, so check finiteness first
        if !value.is_finite() {
            errors.push(format!("{name}: value must be finite (got {value})"));
        } else if value <= 0.0 {
            errors.push(format!("{name}: value ({value:.3}) must be > 0"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Lab Info
// ============================================================================

/// Identification metadata, only used in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabInfo {
    #[serde(default = "default_lab_name")]
    pub name: String,
}

fn default_lab_name() -> String {
    "DEFAULT".to_string()
}

impl Default for LabInfo {
    fn default() -> Self {
        Self {
            name: default_lab_name(),
        }
    }
}

// ============================================================================
// Rule Config
// ============================================================================

/// Westgard limits (in SD units), window sizes and per-rule toggles.
///
/// 1-3s and 1-2s cannot be disabled; the multirules can.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_warning_limit")]
    pub warning_limit_sd: f64,

    #[serde(default = "default_reject_limit")]
    pub reject_limit_sd: f64,

    #[serde(default = "default_range_limit")]
    pub range_limit_sd: f64,

    #[serde(default = "default_shift_limit")]
    pub shift_limit_sd: f64,

    #[serde(default = "default_shift_points")]
    pub shift_points: usize,

    #[serde(default = "default_trend_points")]
    pub trend_points: usize,

    #[serde(default = "default_true")]
    pub two_two_s: bool,

    #[serde(default = "default_true")]
    pub range_four_s: bool,

    #[serde(default = "default_true")]
    pub four_one_s: bool,

    #[serde(default = "default_true")]
    pub ten_x: bool,
}

fn default_warning_limit() -> f64 {
    DEFAULT_WARNING_LIMIT_SD
}

fn default_reject_limit() -> f64 {
    DEFAULT_REJECT_LIMIT_SD
}

fn default_range_limit() -> f64 {
    DEFAULT_RANGE_LIMIT_SD
}

fn default_shift_limit() -> f64 {
    DEFAULT_SHIFT_LIMIT_SD
}

fn default_shift_points() -> usize {
    DEFAULT_SHIFT_POINTS
}

fn default_trend_points() -> usize {
    DEFAULT_TREND_POINTS
}

fn default_true() -> bool {
    true
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            warning_limit_sd: default_warning_limit(),
            reject_limit_sd: default_reject_limit(),
            range_limit_sd: default_range_limit(),
            shift_limit_sd: default_shift_limit(),
            shift_points: default_shift_points(),
            trend_points: default_trend_points(),
            two_two_s: true,
            range_four_s: true,
            four_one_s: true,
            ten_x: true,
        }
    }
}

// ============================================================================
// Ingestion Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Prior z-scores requested per group from the history collaborator.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Default cap on the history handed to the rule validator.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database directory for measurements
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// JSON file holding the baseline store
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/qc_measurements.db")
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from(crate::baseline::DEFAULT_STATE_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            baseline_path: default_baseline_path(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
