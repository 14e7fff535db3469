//! Statistics primitives: mean, sample standard deviation, z-score.
//!
//! Preconditions are checked up front so a degenerate input never leaks a
//! NaN or Infinity to the caller. The arithmetic itself is delegated to the
//! statrs `Statistics` trait (sample, N-1 denominator for the SD).

use statrs::statistics::Statistics;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StatsError {
    #[error("Cannot compute statistics over an empty input")]
    EmptyInput,

    #[error("Insufficient data: have {count} value(s), need at least 2")]
    InsufficientData { count: usize },

    #[error("Standard deviation is zero, z-score is undefined")]
    DivideByZero,
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::EmptyInput);
    }
    Ok(values.iter().mean())
}

/// Sample standard deviation (N-1 denominator).
pub fn standard_deviation(values: &[f64]) -> Result<f64, StatsError> {
    if values.len() < 2 {
        return Err(StatsError::InsufficientData {
            count: values.len(),
        });
    }
    Ok(values.iter().std_dev())
}

/// Deviation from `mean` in units of `sd`.
///
/// Fails with `DivideByZero` for a zero SD. A non-finite or negative SD is
/// treated the same way, since it cannot produce a meaningful score either.
pub fn z_score(value: f64, mean: f64, sd: f64) -> Result<f64, StatsError> {
    if sd == 0.0 || !sd.is_finite() || sd < 0.0 {
        return Err(StatsError::DivideByZero);
    }
    Ok((value - mean) / sd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_known_values() {
        let m = mean(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((m - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_sd_known_values() {
        // Sum of squared deviations = 32, sample variance = 32/7
        let sd = standard_deviation(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - (32.0_f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sd_of_three_controls() {
        let sd = standard_deviation(&[10.0, 11.0, 9.0]).unwrap();
        assert!((sd - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_fails() {
        assert_eq!(mean(&[]), Err(StatsError::EmptyInput));
        assert_eq!(
            standard_deviation(&[]),
            Err(StatsError::InsufficientData { count: 0 })
        );
    }

    #[test]
    fn test_single_value_sd_fails() {
        assert_eq!(
            standard_deviation(&[4.2]),
            Err(StatsError::InsufficientData { count: 1 })
        );
        assert_eq!(mean(&[4.2]), Ok(4.2));
    }

    #[test]
    fn test_z_score() {
        assert_eq!(z_score(13.0, 10.0, 1.0), Ok(3.0));
        assert_eq!(z_score(8.0, 10.0, 2.0), Ok(-1.0));
    }

    #[test]
    fn test_z_score_zero_sd_fails() {
        assert_eq!(z_score(13.0, 10.0, 0.0), Err(StatsError::DivideByZero));
        assert_eq!(z_score(13.0, 10.0, f64::NAN), Err(StatsError::DivideByZero));
        assert_eq!(z_score(13.0, 10.0, -1.0), Err(StatsError::DivideByZero));
    }
}
