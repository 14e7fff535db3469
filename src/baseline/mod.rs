//! Baseline Store - keyed (analyte, level, lot) → (mean, SD)
//!
//! The baseline in force for a group is what new measurements are scored
//! against. Measurements carry a copy of the baseline they were scored with,
//! so changing a baseline here never touches stored measurements; it only
//! affects what the next candidates of that group declare.
//!
//! ## Operations
//!
//! - `set`: install a baseline (new lot, manual entry)
//! - `update_mean`: operator recalibration of the mean, idempotent per key
//! - `learn_from`: derive baselines from in-control history
//! - `remove`: drop a group on lot change
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = BaselineStore::load_or_new(Path::new(DEFAULT_STATE_PATH));
//! let key = GroupKey::new("Glucose", "Normal", "076587");
//! store.set(&key, 98.0, 2.1, now)?;
//! store.update_baseline(&key, 97.5)?;
//! store.save_to_file(Path::new(DEFAULT_STATE_PATH))?;
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregation;
use crate::types::{GroupKey, Measurement};

/// Schema version for persistence compatibility
pub const SCHEMA_VERSION: u32 = 1;

/// Default file path for baseline persistence
pub const DEFAULT_STATE_PATH: &str = "data/baselines.json";

/// In-control runs required before a baseline is learned from history.
pub const DEFAULT_MIN_SAMPLES: usize = 20;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("No baseline for {0}")]
    NotFound(GroupKey),

    #[error("Invalid baseline for {0}: mean={1}, sd={2}")]
    Invalid(GroupKey, f64, f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema version mismatch: file has v{0}, expected v{1}")]
    SchemaMismatch(u32, u32),
}

// ============================================================================
// Baseline
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub sd: f64,
    /// Runs the baseline was learned from; `None` for manual entries
    #[serde(default)]
    pub sample_count: Option<usize>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

/// The baseline-update collaborator contract.
///
/// Implementations must be idempotent per key: applying the same mean twice
/// leaves the same state as applying it once.
pub trait BaselineUpdate {
    fn update_baseline(&mut self, group: &GroupKey, new_mean: f64) -> Result<(), BaselineError>;
}

// ============================================================================
// Store
// ============================================================================

#[derive(Serialize, Deserialize)]
struct BaselineEntry {
    key: GroupKey,
    baseline: Baseline,
}

#[derive(Serialize, Deserialize)]
struct BaselineState {
    schema_version: u32,
    baselines: Vec<BaselineEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct BaselineStore {
    baselines: HashMap<GroupKey, Baseline>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group: &GroupKey) -> Option<&Baseline> {
        self.baselines.get(group)
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    /// Install or replace the baseline of a group.
    pub fn set(
        &mut self,
        group: &GroupKey,
        mean: f64,
        sd: f64,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<&Baseline, BaselineError> {
        if !mean.is_finite() || !sd.is_finite() || sd < 0.0 {
            return Err(BaselineError::Invalid(group.clone(), mean, sd));
        }
        info!(group = %group, mean, sd, "Baseline set");
        self.baselines.insert(
            group.clone(),
            Baseline {
                mean,
                sd,
                sample_count: None,
                updated_at: timestamp,
            },
        );
        self.baselines
            .get(group)
            .ok_or_else(|| BaselineError::NotFound(group.clone()))
    }

    /// Replace the mean of an existing baseline, keeping its SD.
    pub fn update_mean(&mut self, group: &GroupKey, new_mean: f64) -> Result<(), BaselineError> {
        let baseline = self
            .baselines
            .get_mut(group)
            .ok_or_else(|| BaselineError::NotFound(group.clone()))?;
        if !new_mean.is_finite() {
            return Err(BaselineError::Invalid(group.clone(), new_mean, baseline.sd));
        }
        if baseline.mean == new_mean {
            debug!(group = %group, mean = new_mean, "Baseline mean unchanged");
            return Ok(());
        }
        info!(group = %group, old_mean = baseline.mean, new_mean, "Baseline mean updated");
        baseline.mean = new_mean;
        Ok(())
    }

    /// Drop a group's baseline (lot change).
    pub fn remove(&mut self, group: &GroupKey) -> Option<Baseline> {
        let removed = self.baselines.remove(group);
        if removed.is_some() {
            info!(group = %group, "Baseline removed");
        }
        removed
    }

    /// Learn baselines from history: per group, the mean and SD of its
    /// in-control measurements, for groups with at least `min_samples` of them.
    ///
    /// Returns the groups that were (re)learned, sorted.
    pub fn learn_from(
        &mut self,
        measurements: &[Measurement],
        min_samples: usize,
    ) -> Vec<GroupKey> {
        let mut by_group: BTreeMap<GroupKey, Vec<Measurement>> = BTreeMap::new();
        for m in aggregation::filter_in_control(measurements) {
            by_group.entry(m.group()).or_default().push(m);
        }

        let mut learned = Vec::new();
        for (group, members) in by_group {
            if members.len() < min_samples.max(2) {
                debug!(
                    group = %group,
                    samples = members.len(),
                    needed = min_samples,
                    "Not enough runs to learn baseline"
                );
                continue;
            }
            let stats = match aggregation::compute_mean_and_sd(&members) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(group = %group, error = %e, "Skipping baseline learning");
                    continue;
                }
            };
            info!(
                group = %group,
                mean = stats.mean,
                sd = stats.sd,
                samples = stats.count,
                "Baseline learned"
            );
            self.baselines.insert(
                group.clone(),
                Baseline {
                    mean: stats.mean,
                    sd: stats.sd,
                    sample_count: Some(stats.count),
                    updated_at: members.last().map(Measurement::timestamp),
                },
            );
            learned.push(group);
        }
        learned
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Save all baselines to a JSON file. Parent directories are created.
    pub fn save_to_file(&self, path: &Path) -> Result<(), BaselineError> {
        let mut baselines: Vec<BaselineEntry> = self
            .baselines
            .iter()
            .map(|(key, baseline)| BaselineEntry {
                key: key.clone(),
                baseline: baseline.clone(),
            })
            .collect();
        baselines.sort_by(|a, b| a.key.cmp(&b.key));

        let state = BaselineState {
            schema_version: SCHEMA_VERSION,
            baselines,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), baselines = self.baselines.len(), "Baseline state saved");
        Ok(())
    }

    /// Load baselines from a JSON file.
    ///
    /// Returns `None` when the file is missing, corrupt, or has an
    /// incompatible schema version.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(j) => j,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No baseline state file found");
                return None;
            }
        };
        let state: BaselineState = match serde_json::from_str(&json) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt baseline state file, ignoring");
                return None;
            }
        };
        if state.schema_version != SCHEMA_VERSION {
            warn!(
                error = %BaselineError::SchemaMismatch(state.schema_version, SCHEMA_VERSION),
                "Ignoring saved baseline state"
            );
            return None;
        }
        info!(path = %path.display(), baselines = state.baselines.len(), "Baseline state loaded");
        Some(Self {
            baselines: state
                .baselines
                .into_iter()
                .map(|entry| (entry.key, entry.baseline))
                .collect(),
        })
    }

    /// Load from file if it exists and is valid, otherwise create new.
    pub fn load_or_new(path: &Path) -> Self {
        Self::load_from_file(path).unwrap_or_else(|| {
            debug!("No valid baseline state found, starting fresh");
            Self::new()
        })
    }
}

impl BaselineUpdate for BaselineStore {
    fn update_baseline(&mut self, group: &GroupKey, new_mean: f64) -> Result<(), BaselineError> {
        self.update_mean(group, new_mean)
    }
}

// ============================================================================
// Tests
// ============================================================================
