//! Data/simulation scale factors.

use tsf_core::{EfficiencyResult, Error, Result, ScaleFactorResult, VariationSet};

/// `a / b`, or NaN when the quotient is undefined (zero or non-finite
/// operands).
pub fn safe_ratio(a: f64, b: f64) -> f64 {
    if b == 0.0 || !a.is_finite() || !b.is_finite() {
        return f64::NAN;
    }
    let ratio = a / b;
    if ratio.is_finite() { ratio } else { f64::NAN }
}

/// Ratio of the data efficiency to the simulated efficiency.
///
/// `up = data.up / mc.down` and `down = data.down / mc.up`: the widest band
/// obtainable from the two intervals. Undefined cells are NaN; the axes of
/// both inputs must agree.
// TODO: have the cross-paired band reviewed against a proper interval
// combination for independent asymmetric errors.
pub fn combine_scale_factors(
    data: &EfficiencyResult,
    mc: &EfficiencyResult,
) -> Result<ScaleFactorResult> {
    if data.axes != mc.axes {
        return Err(Error::Validation(
            "data and simulation efficiencies have different axes".into(),
        ));
    }
    VariationSet::new(
        data.axes.clone(),
        data.nominal.zip_map(&mc.nominal, safe_ratio)?,
        data.up.zip_map(&mc.down, safe_ratio)?,
        data.down.zip_map(&mc.up, safe_ratio)?,
    )
}
