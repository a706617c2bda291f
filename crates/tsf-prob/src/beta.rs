//! Beta distribution utilities.

use statrs::function::beta::beta_reg;
use tsf_core::{Error, Result};

const PPF_MAX_ITER: usize = 200;

fn check_shape(a: f64, b: f64) -> Result<()> {
    if !a.is_finite() || a <= 0.0 {
        return Err(Error::Validation(format!("a must be finite and > 0, got {}", a)));
    }
    if !b.is_finite() || b <= 0.0 {
        return Err(Error::Validation(format!("b must be finite and > 0, got {}", b)));
    }
    Ok(())
}

/// CDF of a Beta(`a`, `b`) distribution at `x` (regularized incomplete beta).
pub fn cdf(x: f64, a: f64, b: f64) -> Result<f64> {
    check_shape(a, b)?;
    if x.is_nan() {
        return Err(Error::Validation("x must not be NaN".into()));
    }
    if x <= 0.0 {
        return Ok(0.0);
    }
    if x >= 1.0 {
        return Ok(1.0);
    }
    Ok(beta_reg(a, b, x))
}

/// Quantile (inverse CDF) of a Beta(`a`, `b`) distribution.
///
/// Bisection on [`cdf`]; runs until the bracket stops shrinking, so the
/// result is reproducible to the last bit.
pub fn ppf(q: f64, a: f64, b: f64) -> Result<f64> {
    check_shape(a, b)?;
    if !(0.0..=1.0).contains(&q) {
        return Err(Error::Validation(format!("q must be in [0,1], got {}", q)));
    }
    if q == 0.0 {
        return Ok(0.0);
    }
    if q == 1.0 {
        return Ok(1.0);
    }

    let mut lo = 0.0f64;
    let mut hi = 1.0f64;
    for _ in 0..PPF_MAX_ITER {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if beta_reg(a, b, mid) < q {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_is_identity() {
        for q in [0.1, 0.25, 0.5, 0.9] {
            assert_relative_eq!(ppf(q, 1.0, 1.0).unwrap(), q, epsilon = 1e-12);
            assert_relative_eq!(cdf(q, 1.0, 1.0).unwrap(), q, epsilon = 1e-12);
        }
    }

    #[test]
    fn power_law_quantile() {
        // Beta(n, 1) has CDF x^n.
        let n = 5.0;
        let q: f64 = 0.16;
        assert_relative_eq!(ppf(q, n, 1.0).unwrap(), q.powf(1.0 / n), epsilon = 1e-12);
    }

    #[test]
    fn ppf_inverts_cdf() {
        let (a, b) = (9.5, 3.25);
        for q in [0.01, 0.16, 0.5, 0.84, 0.99] {
            let x = ppf(q, a, b).unwrap();
            assert_relative_eq!(cdf(x, a, b).unwrap(), q, epsilon = 1e-10);
        }
    }

    #[test]
    fn invalid_params() {
        assert!(ppf(0.5, 0.0, 1.0).is_err());
        assert!(ppf(0.5, 1.0, -1.0).is_err());
        assert!(ppf(1.5, 1.0, 1.0).is_err());
        assert!(cdf(f64::NAN, 1.0, 1.0).is_err());
    }
}
