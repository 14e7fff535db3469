//! Rule verdict types produced by the rule validator.

use serde::{Deserialize, Serialize};

/// Westgard multirule codes, plus the two non-rule outcomes.
///
/// Serialized in the conventional QC notation (`"1-3s"`, `"R-4s"`, ...), which
/// is also what ends up in the stored `rules` column of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleCode {
    /// No rule fired
    #[serde(rename = "none")]
    None,
    /// Single point beyond the warning limit (2 SD)
    #[serde(rename = "1-2s")]
    OneTwoS,
    /// Single point beyond the rejection limit (3 SD)
    #[serde(rename = "1-3s")]
    OneThreeS,
    /// Two consecutive points beyond 2 SD on the same side
    #[serde(rename = "2-2s")]
    TwoTwoS,
    /// Range between two consecutive points of opposite sign spans 4 SD
    #[serde(rename = "R-4s")]
    RangeFourS,
    /// Four consecutive points beyond 1 SD on the same side
    #[serde(rename = "4-1s")]
    FourOneS,
    /// Ten consecutive points on the same side of the mean
    #[serde(rename = "10x")]
    TenX,
    /// Baseline SD is zero (or unusable); the point cannot be scored
    #[serde(rename = "invalid-baseline")]
    InvalidBaseline,
}

impl RuleCode {
    pub fn severity(self) -> Severity {
        match self {
            RuleCode::None => Severity::InControl,
            RuleCode::OneTwoS => Severity::Warning,
            RuleCode::OneThreeS
            | RuleCode::TwoTwoS
            | RuleCode::RangeFourS
            | RuleCode::FourOneS
            | RuleCode::TenX
            | RuleCode::InvalidBaseline => Severity::Reject,
        }
    }

    /// Conventional short notation, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            RuleCode::None => "none",
            RuleCode::OneTwoS => "1-2s",
            RuleCode::OneThreeS => "1-3s",
            RuleCode::TwoTwoS => "2-2s",
            RuleCode::RangeFourS => "R-4s",
            RuleCode::FourOneS => "4-1s",
            RuleCode::TenX => "10x",
            RuleCode::InvalidBaseline => "invalid-baseline",
        }
    }
}

impl std::fmt::Display for RuleCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a rule code. Ordered: `InControl < Warning < Reject`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    InControl,
    Warning,
    Reject,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::InControl => write!(f, "IN_CONTROL"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Reject => write!(f, "REJECT"),
        }
    }
}

/// Outcome of scoring one value against its baseline and history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    /// Rule that decided the outcome
    pub code: RuleCode,
    /// Human-readable explanation, stored next to the code
    pub description: String,
    /// False only for rejecting rules and an invalid baseline
    pub in_control: bool,
    /// z-score of the point, absent when the baseline SD is unusable
    pub z_score: Option<f64>,
}

impl RuleVerdict {
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_code_serializes_in_qc_notation() {
        let json = serde_json::to_string(&RuleCode::RangeFourS).unwrap();
        assert_eq!(json, "\"R-4s\"");
        let back: RuleCode = serde_json::from_str("\"10x\"").unwrap();
        assert_eq!(back, RuleCode::TenX);
    }

    #[test]
    fn test_display_matches_serialized_form() {
        for code in [
            RuleCode::None,
            RuleCode::OneTwoS,
            RuleCode::OneThreeS,
            RuleCode::TwoTwoS,
            RuleCode::RangeFourS,
            RuleCode::FourOneS,
            RuleCode::TenX,
            RuleCode::InvalidBaseline,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{code}\""));
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Reject > Severity::Warning);
        assert!(Severity::Warning > Severity::InControl);
        assert_eq!(RuleCode::OneTwoS.severity(), Severity::Warning);
        assert_eq!(RuleCode::InvalidBaseline.severity(), Severity::Reject);
    }
}
