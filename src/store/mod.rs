//! Measurement store collaborators.
//!
//! The engine never touches a database directly. It talks to these traits,
//! one per boundary contract:
//!
//! - `ExistenceCheck`: duplicate detection for the ingestion guard
//! - `HistoryLookup`: recent z-scores of a (name, level, lot) group
//! - `MeasurementSink`: persisting an accepted batch
//! - `MeasurementQuery`: filtered retrieval feeding the aggregation engine
//!
//! Two reference implementations live here: `InMemoryRepository` for tests
//! and embedding, and `SledRepository` for the CLI.

mod memory;
mod sled_store;

pub use memory::InMemoryRepository;
pub use sled_store::SledRepository;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{normalize_name, GroupKey, Measurement, MeasurementKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Measurement already stored: {0}")]
    Conflict(MeasurementKey),
}

pub trait ExistenceCheck {
    /// True when a measurement with this (timestamp, level, name) is stored.
    /// Names compare case-insensitively.
    fn exists(&self, timestamp: NaiveDateTime, level: &str, name: &str) -> Result<bool, StoreError>;
}

pub trait HistoryLookup {
    /// z-scores of the `limit` most recent scorable measurements of `group`
    /// taken strictly before `before`, ordered by timestamp, most recent last.
    fn recent_z_scores(
        &self,
        group: &GroupKey,
        before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<f64>, StoreError>;
}

pub trait MeasurementSink {
    /// Persist a batch. Either every measurement is written or none is.
    fn save_all(&self, measurements: &[Measurement]) -> Result<(), StoreError>;
}

pub trait MeasurementQuery {
    /// Measurements matching `filter`, chronological.
    fn find_by_filter(&self, filter: &MeasurementFilter) -> Result<Vec<Measurement>, StoreError>;

    /// True when any measurement exists for the (normalized) analyte name.
    fn name_exists(&self, name: &str) -> Result<bool, StoreError>;
}

/// Everything the CLI needs from a backing store.
pub trait MeasurementRepository:
    ExistenceCheck + HistoryLookup + MeasurementSink + MeasurementQuery
{
}

impl<T> MeasurementRepository for T where
    T: ExistenceCheck + HistoryLookup + MeasurementSink + MeasurementQuery
{
}

/// Retrieval filter. Every field is optional; date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFilter {
    pub name: Option<String>,
    pub level: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl MeasurementFilter {
    pub fn for_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn level(mut self, level: &str) -> Self {
        self.level = Some(level.to_string());
        self
    }

    pub fn between(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn matches(&self, m: &Measurement) -> bool {
        if let Some(name) = &self.name {
            if normalize_name(name) != m.name() {
                return false;
            }
        }
        if let Some(level) = &self.level {
            if level != m.level() {
                return false;
            }
        }
        if let Some(start) = self.start {
            if m.timestamp() < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if m.timestamp() > end {
                return false;
            }
        }
        true
    }
}
