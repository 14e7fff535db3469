//! Measurement Ingestion Guard
//!
//! Takes a batch of candidates on its way to storage and:
//!
//! 1. validates each record (non-empty name/level, finite numbers, SD >= 0)
//! 2. rejects the whole batch if any candidate duplicates a stored measurement
//!    (same timestamp, level and name) or another candidate of the batch
//! 3. scores each candidate with the rule validator against the z-score
//!    history of its (name, level, lot) group and stamps the verdict on it
//!
//! The batch is all-or-nothing: on any failure nothing reaches the sink.
//! Candidates of one group are scored in timestamp order, and each scored
//! candidate joins the history seen by the next one.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::config::IngestionConfig;
use crate::rules::RuleValidator;
use crate::store::{ExistenceCheck, HistoryLookup, MeasurementRepository, StoreError};
use crate::types::{GroupKey, Measurement, MeasurementCandidate, MeasurementKey};

// ============================================================================
// Errors
// ============================================================================

/// Why a candidate counts as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSource {
    /// A stored measurement has the same key
    Stored,
    /// An earlier candidate of the same batch has the same key
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    /// Position of the offending candidate in the batch
    pub index: usize,
    pub key: MeasurementKey,
    pub source: DuplicateSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Batch rejected, {} duplicate measurement(s): {}", .collisions.len(), describe(.collisions))]
pub struct DuplicateMeasurementError {
    pub collisions: Vec<Collision>,
}

fn describe(collisions: &[Collision]) -> String {
    collisions
        .iter()
        .map(|c| c.key.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordProblem {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateMeasurementError),

    #[error("Invalid record(s): {}", .0.iter().map(|p| format!("#{} {}", p.index, p.reason)).collect::<Vec<_>>().join("; "))]
    InvalidRecord(Vec<RecordProblem>),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// Guard
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct IngestionGuard {
    validator: RuleValidator,
    config: IngestionConfig,
}

impl IngestionGuard {
    pub fn new(validator: RuleValidator, config: IngestionConfig) -> Self {
        Self { validator, config }
    }

    /// Validate, deduplicate and score a batch. Returns the stamped
    /// measurements in batch order, ready for persistence.
    pub fn check_batch<E, H>(
        &self,
        batch: Vec<MeasurementCandidate>,
        existence: &E,
        history: &H,
    ) -> Result<Vec<Measurement>, IngestError>
    where
        E: ExistenceCheck + ?Sized,
        H: HistoryLookup + ?Sized,
    {
        validate_records(&batch)?;
        self.find_duplicates(&batch, existence)?;
        self.score(batch, history)
    }

    /// `check_batch`, then one `save_all` with the whole accepted set.
    pub fn ingest_and_persist<R>(
        &self,
        batch: Vec<MeasurementCandidate>,
        repository: &R,
    ) -> Result<Vec<Measurement>, IngestError>
    where
        R: MeasurementRepository + ?Sized,
    {
        let accepted = self.check_batch(batch, repository, repository)?;
        if !accepted.is_empty() {
            repository.save_all(&accepted)?;
        }
        Ok(accepted)
    }

    fn find_duplicates<E: ExistenceCheck + ?Sized>(
        &self,
        batch: &[MeasurementCandidate],
        existence: &E,
    ) -> Result<(), IngestError> {
        let mut collisions = Vec::new();
        let mut seen: HashSet<MeasurementKey> = HashSet::with_capacity(batch.len());

        for (index, candidate) in batch.iter().enumerate() {
            let key = candidate.key();
            if existence.exists(candidate.timestamp, &candidate.level, &candidate.name)? {
                collisions.push(Collision {
                    index,
                    key,
                    source: DuplicateSource::Stored,
                });
            } else if !seen.insert(key.clone()) {
                collisions.push(Collision {
                    index,
                    key,
                    source: DuplicateSource::Batch,
                });
            }
        }

        if collisions.is_empty() {
            Ok(())
        } else {
            Err(DuplicateMeasurementError { collisions }.into())
        }
    }

    fn score<H: HistoryLookup + ?Sized>(
        &self,
        batch: Vec<MeasurementCandidate>,
        history: &H,
    ) -> Result<Vec<Measurement>, IngestError> {
        let limit = self.config.history_limit;

        // Score in timestamp order; the sort is stable so equal timestamps
        // keep batch order.
        let mut order: Vec<usize> = (0..batch.len()).collect();
        order.sort_by_key(|&i| batch[i].timestamp);

        let mut histories: HashMap<GroupKey, Vec<f64>> = HashMap::new();
        let mut stamped: Vec<Option<Measurement>> = vec![None; batch.len()];
        let mut slots: Vec<Option<MeasurementCandidate>> =
            batch.into_iter().map(Some).collect();

        for i in order {
            let Some(candidate) = slots[i].take() else {
                continue;
            };
            // The first candidate seen for a group is its earliest, so the
            // seeded history never contains runs taken after it.
            let group_history = match histories.entry(candidate.group()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let before = candidate.timestamp;
                    let seeded = history.recent_z_scores(entry.key(), before, limit)?;
                    entry.insert(seeded)
                }
            };

            let measurement = self.validator.stamp(candidate, group_history.as_slice());
            if let Some(z) = measurement.z_score() {
                group_history.push(z);
                if group_history.len() > limit {
                    group_history.remove(0);
                }
            }
            stamped[i] = Some(measurement);
        }

        Ok(stamped.into_iter().flatten().collect())
    }
}

fn validate_records(batch: &[MeasurementCandidate]) -> Result<(), IngestError> {
    let mut problems = Vec::new();
    for (index, c) in batch.iter().enumerate() {
        let mut reasons = Vec::new();
        if c.name.trim().is_empty() {
            reasons.push("name is empty".to_string());
        }
        if c.level.trim().is_empty() {
            reasons.push("level is empty".to_string());
        }
        for (field, v) in [("value", c.value), ("mean", c.mean), ("sd", c.sd)] {
            if !v.is_finite() {
                reasons.push(format!("{field} is not finite"));
            }
        }
        if c.sd < 0.0 {
            reasons.push(format!("sd {} is negative", c.sd));
        }
        if !reasons.is_empty() {
            problems.push(RecordProblem {
                index,
                reason: reasons.join(", "),
            });
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(IngestError::InvalidRecord(problems))
    }
}

// ============================================================================
// Tests
// ============================================================================
