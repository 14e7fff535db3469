//! QC Engine: Westgard rule validation for laboratory quality control
//!
//! ## Architecture
//!
//! - **Stats**: mean, sample SD and z-score primitives
//! - **Rules**: Westgard multirule classification of a control result
//! - **Ingestion**: duplicate-safe, all-or-nothing scoring of batches
//! - **Aggregation**: mean/SD and per-level summaries for reporting
//! - **Store**: collaborator traits plus in-memory and sled implementations
//! - **Baseline**: per-group target mean/SD, persisted as JSON

pub mod aggregation;
pub mod baseline;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod rules;
pub mod stats;
pub mod store;
pub mod types;

// Re-export configuration
pub use config::{IngestionConfig, QcConfig, RuleConfig};

// Re-export commonly used types
pub use types::{
    GroupKey, GroupedByLevel, LevelSummary, MeanAndSd, Measurement, MeasurementCandidate,
    MeasurementKey, RuleCode, RuleVerdict, Severity,
};

pub use aggregation::{AggregationError, Reports};
pub use baseline::{Baseline, BaselineError, BaselineStore, BaselineUpdate};
pub use error::QcError;
pub use ingestion::{DuplicateMeasurementError, IngestError, IngestionGuard};
pub use rules::RuleValidator;
pub use stats::StatsError;
pub use store::{
    InMemoryRepository, MeasurementFilter, MeasurementRepository, SledRepository, StoreError,
};
