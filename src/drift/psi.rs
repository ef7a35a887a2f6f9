//! Population Stability Index
//!
//! Buckets come from the baseline's deciles. Breakpoints are deduplicated and
//! the outer buckets are open-ended, so every current value lands somewhere.
//! Empty buckets get a small floor share instead of zero.

use serde::{Deserialize, Serialize};

use crate::domain::DriftSeverity;

pub const DEFAULT_BINS: usize = 10;
pub const DEFAULT_FLOOR: f64 = 0.0001;

pub const WARNING_PSI: f64 = 0.1;
pub const SIGNIFICANT_PSI: f64 = 0.2;
pub const CRITICAL_PSI: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsiResult {
    pub psi: f64,
    /// Buckets actually used after breakpoint deduplication
    pub buckets: usize,
    /// Buckets where either side was empty and the floor was substituted
    pub floored_buckets: usize,
    /// Baseline produced fewer distinct buckets than requested
    pub low_cardinality: bool,
}

impl PsiResult {
    pub fn is_degenerate(&self) -> bool {
        self.floored_buckets > 0 || self.low_cardinality
    }
}

/// Severity band of a PSI value
pub fn classify(psi: f64) -> DriftSeverity {
    if psi < WARNING_PSI {
        DriftSeverity::Stable
    } else if psi < SIGNIFICANT_PSI {
        DriftSeverity::Warning
    } else if psi < CRITICAL_PSI {
        DriftSeverity::Significant
    } else {
        DriftSeverity::Critical
    }
}

/// PSI of `current` against `baseline`. Non-finite values are ignored;
/// `None` when either side has nothing left.
pub fn compute_psi(baseline: &[f64], current: &[f64], floor: f64, bins: usize) -> Option<PsiResult> {
    let mut base: Vec<f64> = baseline.iter().copied().filter(|v| v.is_finite()).collect();
    let cur: Vec<f64> = current.iter().copied().filter(|v| v.is_finite()).collect();
    if base.is_empty() || cur.is_empty() {
        return None;
    }
    base.sort_by(f64::total_cmp);

    let bins = bins.max(2);
    let mut breakpoints: Vec<f64> = (1..bins)
        .map(|i| quantile(&base, i as f64 / bins as f64))
        .collect();
    breakpoints.dedup();

    let base_counts = histogram(&base, &breakpoints);
    let cur_counts = histogram(&cur, &breakpoints);

    let mut psi = 0.0;
    let mut floored_buckets = 0;
    for (&b, &c) in base_counts.iter().zip(&cur_counts) {
        if b == 0 || c == 0 {
            floored_buckets += 1;
        }
        let base_pct = (b as f64 / base.len() as f64).max(floor);
        let cur_pct = (c as f64 / cur.len() as f64).max(floor);
        psi += (cur_pct - base_pct) * (cur_pct / base_pct).ln();
    }

    Some(PsiResult {
        psi,
        buckets: base_counts.len(),
        floored_buckets,
        low_cardinality: base_counts.len() < bins,
    })
}

/// Linear-interpolated quantile of sorted data
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Bucket `i` holds values in `(breakpoints[i-1], breakpoints[i]]`
fn histogram(values: &[f64], breakpoints: &[f64]) -> Vec<usize> {
    let mut counts = vec![0usize; breakpoints.len() + 1];
    for v in values {
        counts[breakpoints.partition_point(|b| b < v)] += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::gaussian_sample;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_identical_samples_have_zero_psi() {
        let sample = gaussian_sample(8.0, 2.0, 1000, 1);
        let result = compute_psi(&sample, &sample, DEFAULT_FLOOR, DEFAULT_BINS).unwrap();
        assert_abs_diff_eq!(result.psi, 0.0, epsilon = 1e-12);
        assert_eq!(result.buckets, 10);
        assert!(!result.is_degenerate());
    }

    #[test]
    fn test_psi_grows_with_mean_shift() {
        let baseline = gaussian_sample(8.0, 2.0, 5000, 7);
        let mut last = -1.0;
        for shift in [0.0, 0.5, 1.0, 2.0, 4.0] {
            let current = gaussian_sample(8.0 + shift, 2.0, 2000, 8);
            let psi = compute_psi(&baseline, &current, DEFAULT_FLOOR, DEFAULT_BINS)
                .unwrap()
                .psi;
            assert!(psi > last, "psi {psi} at shift {shift} not above {last}");
            last = psi;
        }
    }

    #[test]
    fn test_constant_baseline_is_low_cardinality() {
        let baseline = vec![5.0; 200];
        let current = vec![5.0, 5.0, 6.0, 7.0];
        let result = compute_psi(&baseline, &current, DEFAULT_FLOOR, DEFAULT_BINS).unwrap();
        assert_eq!(result.buckets, 2);
        assert!(result.low_cardinality);
        assert!(result.floored_buckets >= 1);
        assert!(result.psi > 0.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(compute_psi(&[], &[1.0], DEFAULT_FLOOR, DEFAULT_BINS).is_none());
        assert!(compute_psi(&[1.0], &[f64::NAN], DEFAULT_FLOOR, DEFAULT_BINS).is_none());
    }

    #[test]
    fn test_outer_buckets_are_open() {
        let baseline: Vec<f64> = (0..100).map(f64::from).collect();
        let histogram = histogram(&[-1e9, 1e9], &[10.0, 20.0]);
        assert_eq!(histogram, vec![1, 0, 1]);
        let result = compute_psi(&baseline, &[1e9; 20], DEFAULT_FLOOR, DEFAULT_BINS).unwrap();
        assert!(result.psi > CRITICAL_PSI);
    }

    #[rstest]
    #[case(0.0, DriftSeverity::Stable)]
    #[case(0.099, DriftSeverity::Stable)]
    #[case(0.1, DriftSeverity::Warning)]
    #[case(0.2, DriftSeverity::Significant)]
    #[case(0.249, DriftSeverity::Significant)]
    #[case(0.25, DriftSeverity::Critical)]
    fn test_classify(#[case] psi: f64, #[case] expected: DriftSeverity) {
        assert_eq!(classify(psi), expected);
    }

    proptest! {
        #[test]
        fn prop_psi_is_non_negative(
            baseline in prop::collection::vec(-50.0f64..50.0, 20..300),
            current in prop::collection::vec(-50.0f64..50.0, 1..100),
        ) {
            let result = compute_psi(&baseline, &current, DEFAULT_FLOOR, DEFAULT_BINS).unwrap();
            prop_assert!(result.psi >= -1e-12);
        }

        #[test]
        fn prop_psi_of_self_is_zero(sample in prop::collection::vec(-50.0f64..50.0, 1..300)) {
            let result = compute_psi(&sample, &sample, DEFAULT_FLOOR, DEFAULT_BINS).unwrap();
            prop_assert!(result.psi.abs() < 1e-9);
        }
    }
}
