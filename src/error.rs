//! Crate-level error umbrella.
//!
//! Each module owns its error enum; `QcError` lets callers that cross module
//! boundaries hold any of them behind one type.

use thiserror::Error;

use crate::aggregation::AggregationError;
use crate::baseline::BaselineError;
use crate::config::ConfigError;
use crate::ingestion::IngestError;
use crate::stats::StatsError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum QcError {
    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QcError {
    /// True for errors caused by the data handed in (duplicates, invalid
    /// records, too few values, unknown analytes) rather than by storage
    /// or configuration failures.
    pub fn is_domain_error(&self) -> bool {
        match self {
            QcError::Stats(_) => true,
            QcError::Ingest(e) => !matches!(e, IngestError::Store(_)),
            QcError::Aggregation(e) => !matches!(e, AggregationError::Store(_)),
            QcError::Baseline(e) => matches!(
                e,
                BaselineError::NotFound(_) | BaselineError::Invalid(..)
            ),
            QcError::Store(StoreError::Conflict(_)) => true,
            QcError::Store(_) | QcError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroupKey;

    #[test]
    fn test_domain_classification() {
        assert!(QcError::from(StatsError::EmptyInput).is_domain_error());
        assert!(QcError::from(AggregationError::UnknownAnalyte("NA".into())).is_domain_error());
        assert!(QcError::from(BaselineError::NotFound(GroupKey::new("na", "Normal", "1")))
            .is_domain_error());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!QcError::from(BaselineError::Io(io)).is_domain_error());
        assert!(!QcError::from(ConfigError::Validation(vec!["x".into()])).is_domain_error());
    }

    #[test]
    fn test_transparent_display() {
        let err = QcError::from(StatsError::InsufficientData { count: 1 });
        assert_eq!(err.to_string(), StatsError::InsufficientData { count: 1 }.to_string());
    }
}
