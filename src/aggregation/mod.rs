//! Aggregation Engine
//!
//! Mean/SD over filtered measurement sets and per-level summaries for
//! reporting. Every function here is a single pass over its input.
//!
//! `Reports` wraps a `MeasurementQuery` collaborator for the read paths:
//! the collaborator decides which measurements match a filter, the engine
//! only computes over what it gets back.

use thiserror::Error;

use crate::stats::{self, StatsError};
use crate::store::{MeasurementFilter, MeasurementQuery, StoreError};
use crate::types::{GroupedByLevel, LevelSummary, MeanAndSd, Measurement};

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Insufficient data for this filter: {0}")]
    Stats(#[from] StatsError),

    #[error("Analyte not found: {0}")]
    UnknownAnalyte(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Mean and sample SD of the measured values.
///
/// Empty input fails with `EmptyInput`, a single measurement with
/// `InsufficientData`.
pub fn compute_mean_and_sd(measurements: &[Measurement]) -> Result<MeanAndSd, StatsError> {
    let values: Vec<f64> = measurements.iter().map(Measurement::value).collect();
    let mean = stats::mean(&values)?;
    let sd = stats::standard_deviation(&values)?;
    Ok(MeanAndSd {
        mean,
        sd,
        count: values.len(),
    })
}

/// Group by level, keeping input order inside each level.
pub fn group_by_level(measurements: &[Measurement]) -> GroupedByLevel {
    let mut groups = GroupedByLevel::new();
    for m in measurements {
        groups.entry(m.level().to_string()).or_default().push(m.clone());
    }
    groups
}

/// Per-level mean/SD. Levels with fewer than two measurements are reported
/// with `insufficient_data` rather than dropped. Output is sorted by level.
pub fn grouped_mean_and_sd(groups: &GroupedByLevel) -> Vec<LevelSummary> {
    groups
        .iter()
        .map(|(level, members)| match compute_mean_and_sd(members) {
            Ok(stats) => LevelSummary::with_stats(level, stats),
            Err(_) => LevelSummary::insufficient(level, members.len()),
        })
        .collect()
}

/// Measurements whose stored verdict did not reject the run.
pub fn filter_in_control(measurements: &[Measurement]) -> Vec<Measurement> {
    measurements
        .iter()
        .filter(|m| !m.is_rejected())
        .cloned()
        .collect()
}

// ============================================================================
// Reports
// ============================================================================

/// Read-path facade over a measurement query collaborator.
pub struct Reports<'a, Q: MeasurementQuery + ?Sized> {
    query: &'a Q,
}

impl<'a, Q: MeasurementQuery + ?Sized> Reports<'a, Q> {
    pub fn new(query: &'a Q) -> Self {
        Self { query }
    }

    /// Fails with `UnknownAnalyte` when no measurement exists for `name`.
    pub fn ensure_analyte_exists(&self, name: &str) -> Result<(), AggregationError> {
        if self.query.name_exists(name)? {
            Ok(())
        } else {
            Err(AggregationError::UnknownAnalyte(name.to_string()))
        }
    }

    pub fn mean_and_sd(&self, filter: &MeasurementFilter) -> Result<MeanAndSd, AggregationError> {
        let measurements = self.query.find_by_filter(filter)?;
        Ok(compute_mean_and_sd(&measurements)?)
    }

    pub fn grouped_by_level(
        &self,
        filter: &MeasurementFilter,
    ) -> Result<GroupedByLevel, AggregationError> {
        Ok(group_by_level(&self.query.find_by_filter(filter)?))
    }

    /// Per-level summaries; with `in_control_only`, rejected runs are left
    /// out before computing.
    pub fn grouped_summaries(
        &self,
        filter: &MeasurementFilter,
        in_control_only: bool,
    ) -> Result<Vec<LevelSummary>, AggregationError> {
        let mut measurements = self.query.find_by_filter(filter)?;
        if in_control_only {
            measurements = filter_in_control(&measurements);
        }
        Ok(grouped_mean_and_sd(&group_by_level(&measurements)))
    }
}

// ============================================================================
// Tests
// ============================================================================
