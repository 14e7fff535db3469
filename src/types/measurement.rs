//! QC measurement types.
//!
//! A `MeasurementCandidate` is what arrives from an instrument export or a
//! form: the raw value plus the baseline that was in force when it was run.
//! A `Measurement` is a candidate that has been scored by the rule validator;
//! its verdict is fixed at creation and has no setters.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::verdict::{RuleCode, RuleVerdict, Severity};

/// Normalize an analyte name for storage and existence checks.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Incoming measurement, not yet scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementCandidate {
    pub timestamp: NaiveDateTime,
    pub name: String,
    pub level: String,
    #[serde(default)]
    pub level_lot: String,
    #[serde(default)]
    pub test_lot: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    /// Baseline mean in force at measurement time
    pub mean: f64,
    /// Baseline SD in force at measurement time
    pub sd: f64,
}

impl MeasurementCandidate {
    /// Duplicate-detection identity: (timestamp, level, normalized name).
    pub fn key(&self) -> MeasurementKey {
        MeasurementKey::new(self.timestamp, &self.level, &self.name)
    }

    /// Baseline/history group: (normalized name, level, level lot).
    pub fn group(&self) -> GroupKey {
        GroupKey::new(&self.name, &self.level, &self.level_lot)
    }
}

/// A scored measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    timestamp: NaiveDateTime,
    name: String,
    level: String,
    level_lot: String,
    test_lot: String,
    value: f64,
    unit: String,
    mean: f64,
    sd: f64,
    rule: RuleCode,
    description: String,
}

impl Measurement {
    /// Stamp a candidate with the verdict computed for it.
    ///
    /// The analyte name is normalized to upper-case here, so every stored
    /// measurement compares case-insensitively by construction.
    pub fn stamped(candidate: MeasurementCandidate, verdict: RuleVerdict) -> Self {
        Self {
            timestamp: candidate.timestamp,
            name: normalize_name(&candidate.name),
            level: candidate.level,
            level_lot: candidate.level_lot,
            test_lot: candidate.test_lot,
            value: candidate.value,
            unit: candidate.unit,
            mean: candidate.mean,
            sd: candidate.sd,
            rule: verdict.code,
            description: verdict.description,
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn level_lot(&self) -> &str {
        &self.level_lot
    }

    pub fn test_lot(&self) -> &str {
        &self.test_lot
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sd(&self) -> f64 {
        self.sd
    }

    pub fn rule(&self) -> RuleCode {
        self.rule
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn severity(&self) -> Severity {
        self.rule.severity()
    }

    pub fn is_rejected(&self) -> bool {
        self.severity() == Severity::Reject
    }

    /// z-score against the baseline stored with the measurement.
    ///
    /// `None` when the stored SD cannot be used as a divisor.
    pub fn z_score(&self) -> Option<f64> {
        crate::stats::z_score(self.value, self.mean, self.sd).ok()
    }

    pub fn key(&self) -> MeasurementKey {
        MeasurementKey::new(self.timestamp, &self.level, &self.name)
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new(&self.name, &self.level, &self.level_lot)
    }
}

/// Identity used for duplicate detection. No tolerance window on the timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementKey {
    pub timestamp: NaiveDateTime,
    pub level: String,
    pub name: String,
}

impl MeasurementKey {
    pub fn new(timestamp: NaiveDateTime, level: &str, name: &str) -> Self {
        Self {
            timestamp,
            level: level.to_string(),
            name: normalize_name(name),
        }
    }
}

impl std::fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.name, self.level, self.timestamp)
    }
}

/// Baseline and history group: (analyte, level, level lot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub name: String,
    pub level: String,
    pub level_lot: String,
}

impl GroupKey {
    pub fn new(name: &str, level: &str, level_lot: &str) -> Self {
        Self {
            name: normalize_name(name),
            level: level.to_string(),
            level_lot: level_lot.to_string(),
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.level, self.level_lot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_keys_compare_names_case_insensitively() {
        let a = MeasurementKey::new(ts(), "Normal", "glucose");
        let b = MeasurementKey::new(ts(), "Normal", "GLUCOSE ");
        assert_eq!(a, b);
        assert_eq!(GroupKey::new("Glucose", "High", "L1"), GroupKey::new("GLUCOSE", "High", "L1"));
    }

    #[test]
    fn test_stamped_normalizes_name_and_keeps_verdict() {
        let candidate = MeasurementCandidate {
            timestamp: ts(),
            name: "Glucose".to_string(),
            level: "Normal".to_string(),
            level_lot: "076587".to_string(),
            test_lot: "T1".to_string(),
            value: 13.0,
            unit: "mg/dL".to_string(),
            mean: 10.0,
            sd: 1.0,
        };
        let verdict = RuleVerdict {
            code: RuleCode::OneThreeS,
            description: "beyond 3 SD".to_string(),
            in_control: false,
            z_score: Some(3.0),
        };
        let m = Measurement::stamped(candidate, verdict);
        assert_eq!(m.name(), "GLUCOSE");
        assert_eq!(m.rule(), RuleCode::OneThreeS);
        assert!(m.is_rejected());
        assert_eq!(m.z_score(), Some(3.0));
    }
}
