//! Forecast Metrics and Evaluation
//!
//! Error metrics for fitted models and the time-ordered cross-validation
//! splitter used by the trainer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Forecast accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error (MW)
    pub mae: f64,
    /// Root Mean Square Error (MW)
    pub rmse: f64,
    /// R² (coefficient of determination)
    pub r2: f64,
    /// Mean observed value (MW)
    pub mean_actual: f64,
    pub sample_count: usize,
}

impl ForecastMetrics {
    /// Calculate metrics from actual and predicted values
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }

        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        for (a, p) in actual.iter().zip(predicted) {
            let error = a - p;
            abs_sum += error.abs();
            sq_sum += error * error;
        }

        let mean_actual = actual.iter().sum::<f64>() / n;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
        let r2 = if total_variance > 1e-10 {
            1.0 - sq_sum / total_variance
        } else {
            0.0
        };

        Ok(Self {
            mae: abs_sum / n,
            rmse: (sq_sum / n).sqrt(),
            r2,
            mean_actual,
            sample_count: actual.len(),
        })
    }

    /// MAE as a percentage of mean observed generation
    pub fn relative_error_pct(&self) -> Option<f64> {
        (self.mean_actual.abs() > 1e-10).then(|| self.mae / self.mean_actual * 100.0)
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.2} MW, RMSE={:.2} MW, R²={:.3}, mean={:.1} MW (n={})",
            self.mae, self.rmse, self.r2, self.mean_actual, self.sample_count
        )
    }
}

/// Forecast metrics calculation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}

/// Time-series cross-validation: expanding train window, each test block
/// strictly later than everything it was trained on. No shuffling.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesCrossValidation {
    n_folds: usize,
}

/// Contiguous index ranges of one fold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: std::ops::Range<usize>,
    pub test: std::ops::Range<usize>,
}

impl TimeSeriesCrossValidation {
    pub const MIN_FOLDS: usize = 3;

    /// Fold counts below [`Self::MIN_FOLDS`] are raised to it
    pub fn new(n_folds: usize) -> Self {
        Self {
            n_folds: n_folds.max(Self::MIN_FOLDS),
        }
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// The data is cut into `n_folds + 1` blocks; fold `k` trains on the
    /// first `k + 1` blocks (plus the remainder) and tests on the next one.
    pub fn split(&self, data_len: usize) -> Vec<Fold> {
        let test_size = data_len / (self.n_folds + 1);
        if test_size == 0 {
            return Vec::new();
        }

        let first_test = data_len - self.n_folds * test_size;
        (0..self.n_folds)
            .map(|k| {
                let test_start = first_test + k * test_size;
                Fold {
                    train: 0..test_start,
                    test: test_start..test_start + test_size,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perfect_forecast() {
        let actual = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let metrics = ForecastMetrics::calculate(&actual, &actual).unwrap();

        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_relative_eq!(metrics.r2, 1.0);
        assert_eq!(metrics.mean_actual, 3.0);
    }

    #[test]
    fn test_metrics_values() {
        let actual = vec![100.0, 200.0, 300.0, 400.0];
        let predicted = vec![110.0, 190.0, 330.0, 400.0];
        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert_relative_eq!(metrics.mae, 12.5);
        assert_relative_eq!(metrics.rmse, (1100.0f64 / 4.0).sqrt());
        assert_relative_eq!(metrics.r2, 1.0 - 1100.0 / 50_000.0);
        assert_relative_eq!(metrics.relative_error_pct().unwrap(), 5.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ForecastMetrics::calculate(&[1.0, 2.0], &[1.0]);
        assert!(matches!(
            result,
            Err(ForecastMetricsError::DimensionMismatch { actual: 2, predicted: 1 })
        ));
        assert!(matches!(
            ForecastMetrics::calculate(&[], &[]),
            Err(ForecastMetricsError::EmptyData)
        ));
    }

    #[test]
    fn test_time_series_split_is_ordered() {
        let cv = TimeSeriesCrossValidation::new(3);
        let folds = cv.split(103);

        assert_eq!(folds.len(), 3);
        assert_eq!(folds[0], Fold { train: 0..28, test: 28..53 });
        assert_eq!(folds[1], Fold { train: 0..53, test: 53..78 });
        assert_eq!(folds[2], Fold { train: 0..78, test: 78..103 });
        for fold in &folds {
            assert!(fold.train.end <= fold.test.start);
        }
    }

    #[test]
    fn test_fold_count_has_a_floor() {
        assert_eq!(TimeSeriesCrossValidation::new(1).n_folds(), 3);
        assert_eq!(TimeSeriesCrossValidation::new(2).split(100).len(), 3);
        assert_eq!(TimeSeriesCrossValidation::new(5).n_folds(), 5);
    }

    #[test]
    fn test_split_too_small() {
        assert!(TimeSeriesCrossValidation::new(3).split(3).is_empty());
    }
}
