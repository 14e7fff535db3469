//! Aggregation output types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::measurement::Measurement;

/// Measurements grouped by control level, chronological within each level.
pub type GroupedByLevel = BTreeMap<String, Vec<Measurement>>;

/// Mean and sample SD over a filtered measurement set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanAndSd {
    pub mean: f64,
    pub sd: f64,
    pub count: usize,
}

/// Per-level summary. Levels with fewer than two members are still reported,
/// with `insufficient_data` set and no statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub sd: Option<f64>,
    pub insufficient_data: bool,
}

impl LevelSummary {
    pub fn with_stats(level: &str, stats: MeanAndSd) -> Self {
        Self {
            level: level.to_string(),
            count: stats.count,
            mean: Some(stats.mean),
            sd: Some(stats.sd),
            insufficient_data: false,
        }
    }

    pub fn insufficient(level: &str, count: usize) -> Self {
        Self {
            level: level.to_string(),
            count,
            mean: None,
            sd: None,
            insufficient_data: true,
        }
    }
}
