//! Rule Validator - Westgard multirule classification
//!
//! Scores one QC value against the baseline (mean, SD) in force for its
//! (analyte, level, lot) group, and against the z-scores of the preceding
//! points in that group.
//!
//! ## Rules
//!
//! | Rule | Fires when | Severity |
//! |------|------------|----------|
//! | 1-3s | \|z\| >= 3 | reject |
//! | 2-2s | this and the previous point beyond 2 SD, same side | reject |
//! | R-4s | this and the previous point on opposite sides, range >= 4 SD | reject |
//! | 4-1s | last 4 points (this included) beyond 1 SD, same side | reject |
//! | 10x  | last 10 points (this included) on the same side of the mean | reject |
//! | 1-2s | 2 <= \|z\| < 3 | warning |
//!
//! Rejecting rules are tried first, in the order above; the 1-2s warning is
//! reported only when no rejecting rule fires. A point exactly on the mean
//! (z = 0) is on neither side and breaks any same-side run.
//!
//! The validator holds only its limits. It has no memory between calls:
//! identical inputs always give identical verdicts.

use crate::config::RuleConfig;
use crate::stats;
use crate::types::{Measurement, MeasurementCandidate, RuleCode, RuleVerdict};

// ============================================================================
// Default Limits (overridden by qc_config.toml)
// ============================================================================

/// Warning limit in SD units (1-2s, and the per-point limit of 2-2s)
pub const DEFAULT_WARNING_LIMIT_SD: f64 = 2.0;

/// Rejection limit in SD units (1-3s)
pub const DEFAULT_REJECT_LIMIT_SD: f64 = 3.0;

/// Range limit in SD units between two consecutive points (R-4s)
pub const DEFAULT_RANGE_LIMIT_SD: f64 = 4.0;

/// Per-point limit in SD units for the shift rule (4-1s)
pub const DEFAULT_SHIFT_LIMIT_SD: f64 = 1.0;

/// Points in the shift window (4-1s)
pub const DEFAULT_SHIFT_POINTS: usize = 4;

/// Points in the trend window (10x)
pub const DEFAULT_TREND_POINTS: usize = 10;

// ============================================================================
// Validator
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleValidator {
    config: RuleConfig,
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(RuleConfig::default())
    }
}

impl RuleValidator {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    /// Number of prior z-scores the multirules can look at.
    pub fn history_window(&self) -> usize {
        self.config
            .shift_points
            .max(self.config.trend_points)
            .max(2)
            - 1
    }

    /// Classify `value` against `(mean, sd)` and the prior z-scores of its
    /// group (chronological, most recent last).
    ///
    /// A zero, negative or non-finite SD never fails: the point is reported
    /// out of control with `RuleCode::InvalidBaseline`.
    pub fn evaluate(&self, value: f64, mean: f64, sd: f64, history: &[f64]) -> RuleVerdict {
        if !value.is_finite() {
            return Self::invalid(format!("value {value} is not a finite number"));
        }
        let z = match stats::z_score(value, mean, sd) {
            Ok(z) if z.is_finite() => z,
            Ok(_) => return Self::invalid(format!("baseline mean {mean} is not usable")),
            Err(_) => return Self::invalid(format!("baseline SD {sd} is not usable")),
        };

        let code = self.classify(z, history);
        RuleVerdict {
            code,
            description: self.describe(code, z),
            in_control: code.severity() != crate::types::Severity::Reject,
            z_score: Some(z),
        }
    }

    /// Score a chronological series against one baseline, feeding each
    /// point's z-score into the history of the next.
    pub fn evaluate_series(&self, values: &[f64], mean: f64, sd: f64) -> Vec<RuleVerdict> {
        let window = self.history_window();
        let mut history: Vec<f64> = Vec::with_capacity(window + 1);
        let mut verdicts = Vec::with_capacity(values.len());

        for &value in values {
            let verdict = self.evaluate(value, mean, sd, &history);
            if let Some(z) = verdict.z_score {
                history.push(z);
                if history.len() > window {
                    history.remove(0);
                }
            }
            verdicts.push(verdict);
        }
        verdicts
    }

    /// Evaluate a candidate and stamp the verdict onto it.
    pub fn stamp(&self, candidate: MeasurementCandidate, history: &[f64]) -> Measurement {
        let verdict = self.evaluate(candidate.value, candidate.mean, candidate.sd, history);
        Measurement::stamped(candidate, verdict)
    }

    fn classify(&self, z: f64, history: &[f64]) -> RuleCode {
        let c = &self.config;
        let abs_z = z.abs();

        if abs_z >= c.reject_limit_sd {
            return RuleCode::OneThreeS;
        }

        if let Some(&prev) = history.last() {
            if c.two_two_s
                && abs_z >= c.warning_limit_sd
                && prev.abs() >= c.warning_limit_sd
                && same_side(z, prev)
            {
                return RuleCode::TwoTwoS;
            }
            if c.range_four_s && opposite_sides(z, prev) && (z - prev).abs() >= c.range_limit_sd {
                return RuleCode::RangeFourS;
            }
        }

        if c.four_one_s
            && same_side_run(z, history, c.shift_points, |v| v.abs() >= c.shift_limit_sd)
        {
            return RuleCode::FourOneS;
        }

        if c.ten_x && same_side_run(z, history, c.trend_points, |_| true) {
            return RuleCode::TenX;
        }

        if abs_z >= c.warning_limit_sd {
            return RuleCode::OneTwoS;
        }

        RuleCode::None
    }

    fn describe(&self, code: RuleCode, z: f64) -> String {
        let c = &self.config;
        let side = if z >= 0.0 { "above" } else { "below" };
        match code {
            RuleCode::None => "Within control limits".to_string(),
            RuleCode::OneTwoS => format!(
                "Warning: value is {:.2} SD {side} the mean (limit {} SD)",
                z.abs(),
                c.warning_limit_sd
            ),
            RuleCode::OneThreeS => format!(
                "Rejected: value is {:.2} SD {side} the mean (limit {} SD), random error",
                z.abs(),
                c.reject_limit_sd
            ),
            RuleCode::TwoTwoS => format!(
                "Rejected: two consecutive values beyond {} SD {side} the mean, systematic error",
                c.warning_limit_sd
            ),
            RuleCode::RangeFourS => format!(
                "Rejected: range between consecutive values exceeds {} SD, random error",
                c.range_limit_sd
            ),
            RuleCode::FourOneS => format!(
                "Rejected: {} consecutive values beyond {} SD {side} the mean, shift",
                c.shift_points, c.shift_limit_sd
            ),
            RuleCode::TenX => format!(
                "Rejected: {} consecutive values {side} the mean, trend or bias",
                c.trend_points
            ),
            RuleCode::InvalidBaseline => "Baseline cannot score this value".to_string(),
        }
    }

    fn invalid(reason: String) -> RuleVerdict {
        RuleVerdict {
            code: RuleCode::InvalidBaseline,
            description: format!("Invalid baseline: {reason}"),
            in_control: false,
            z_score: None,
        }
    }
}

fn same_side(a: f64, b: f64) -> bool {
    (a > 0.0 && b > 0.0) || (a < 0.0 && b < 0.0)
}

fn opposite_sides(a: f64, b: f64) -> bool {
    (a > 0.0 && b < 0.0) || (a < 0.0 && b > 0.0)
}

/// True when the last `points` z-scores (the current one included) all sit on
/// the same side of the mean as `z` and satisfy `pred`.
fn same_side_run(z: f64, history: &[f64], points: usize, pred: impl Fn(f64) -> bool) -> bool {
    if points == 0 || history.len() + 1 < points {
        return false;
    }
    history
        .iter()
        .rev()
        .take(points - 1)
        .copied()
        .chain(std::iter::once(z))
        .all(|v| same_side(v, z) && pred(v))
}

// ============================================================================
// Tests
// ============================================================================
