//! Shared data structures for QC measurements
//!
//! - `MeasurementCandidate`: an incoming control result with its baseline
//! - `Measurement`: a candidate stamped with its Westgard verdict
//! - `RuleVerdict` / `RuleCode` / `Severity`: rule validator output
//! - `MeanAndSd` / `LevelSummary`: aggregation output

mod measurement;
mod summary;
mod verdict;

pub use measurement::*;
pub use summary::*;
pub use verdict::*;
