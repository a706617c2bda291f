//! Binomial proportion intervals.

use crate::beta;
use tsf_core::{Error, Result};

/// Clopper–Pearson ("exact") interval for `k` successes in `n` trials.
///
/// Counts may be non-integer (effective counts of weighted samples).
/// Returns `(lower, upper)` with `lower <= k/n <= upper`; `lower` is exactly 0
/// for `k == 0` and `upper` exactly 1 for `k == n`. Counts that do not describe
/// a proportion (`n <= 0`, `k < 0`, `k > n`, non-finite) give `(NaN, NaN)`.
///
/// Only an invalid `coverage` is an error.
pub fn clopper_pearson_interval(k: f64, n: f64, coverage: f64) -> Result<(f64, f64)> {
    if !coverage.is_finite() || coverage <= 0.0 || coverage >= 1.0 {
        return Err(Error::Validation(format!("coverage must be in (0,1), got {}", coverage)));
    }
    if !k.is_finite() || !n.is_finite() || n <= 0.0 || k < 0.0 || k > n {
        return Ok((f64::NAN, f64::NAN));
    }

    let alpha = 1.0 - coverage;
    let lower = if k == 0.0 { 0.0 } else { beta::ppf(alpha / 2.0, k, n - k + 1.0)? };
    let upper = if k == n { 1.0 } else { beta::ppf(1.0 - alpha / 2.0, k + 1.0, n - k)? };
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn boundary_counts() {
        let (lo, hi) = clopper_pearson_interval(0.0, 10.0, 0.68).unwrap();
        assert_eq!(lo, 0.0);
        // Upper bound for k = 0 solves (1 - p)^n = alpha / 2.
        assert_relative_eq!(hi, 1.0 - 0.16f64.powf(0.1), epsilon = 1e-12);

        let (lo, hi) = clopper_pearson_interval(10.0, 10.0, 0.68).unwrap();
        assert_eq!(hi, 1.0);
        assert_relative_eq!(lo, 0.16f64.powf(0.1), epsilon = 1e-12);
    }

    #[test]
    fn reference_values() {
        // Solved independently from the binomial tail sums.
        let (lo, hi) = clopper_pearson_interval(90.0, 100.0, 0.68).unwrap();
        assert_relative_eq!(lo, 0.860_595_800_094_806_9, epsilon = 1e-9);
        assert_relative_eq!(hi, 0.930_199_062_594_142_6, epsilon = 1e-9);

        let (lo, hi) = clopper_pearson_interval(25.0, 50.0, 0.68).unwrap();
        assert_relative_eq!(lo, 0.420_583_513_683_792_9, epsilon = 1e-9);
        assert_relative_eq!(hi, 0.579_416_486_316_207, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_counts_are_nan() {
        for (k, n) in [(0.0, 0.0), (5.0, 3.0), (-1.0, 3.0), (f64::NAN, 3.0)] {
            let (lo, hi) = clopper_pearson_interval(k, n, 0.68).unwrap();
            assert!(lo.is_nan() && hi.is_nan(), "k={k} n={n}");
        }
    }

    #[test]
    fn bad_coverage() {
        assert!(clopper_pearson_interval(1.0, 2.0, 1.0).is_err());
        assert!(clopper_pearson_interval(1.0, 2.0, 0.0).is_err());
    }

    #[test]
    fn wider_coverage_widens_interval() {
        let (lo68, hi68) = clopper_pearson_interval(30.0, 50.0, 0.68).unwrap();
        let (lo95, hi95) = clopper_pearson_interval(30.0, 50.0, 0.95).unwrap();
        assert!(lo95 < lo68 && hi95 > hi68);
    }

    proptest! {
        #[test]
        fn interval_brackets_proportion(n in 1u32..500, frac in 0.0f64..=1.0) {
            let n = n as f64;
            let k = (frac * n).floor();
            let (lo, hi) = clopper_pearson_interval(k, n, 0.68).unwrap();
            let p = k / n;
            prop_assert!(0.0 <= lo && lo <= p && p <= hi && hi <= 1.0,
                "k={} n={} lo={} p={} hi={}", k, n, lo, p, hi);
        }
    }
}
