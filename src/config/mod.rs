//! QC Configuration Module
//!
//! Per-laboratory configuration loaded from TOML files.
//!
//! ## Loading Order
//!
//! 1. `QC_ENGINE_CONFIG` environment variable (path to TOML file)
//! 2. `qc_config.toml` in the current working directory
//! 3. Built-in defaults (Westgard limits)
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(QcConfig::load());
//!
//! // In the binary's wiring:
//! let validator = RuleValidator::new(config::get().rules.clone());
//! ```
//!
//! Library components never read the global; they take their section of the
//! config as a constructor argument.

mod qc_config;
pub mod validation;

pub use qc_config::*;

use std::sync::OnceLock;

static QC_CONFIG: OnceLock<QcConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: QcConfig) {
    if QC_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Global configuration, or the built-in defaults if `init()` never ran.
pub fn get() -> &'static QcConfig {
    QC_CONFIG.get_or_init(QcConfig::default)
}
