//! Trigger efficiencies with Clopper–Pearson intervals.

use tsf_core::{AxisEdges, EfficiencyResult, Error, NdArray, Result, VariationSet};
use tsf_hist::WeightedHistogram;
use tsf_prob::clopper_pearson_interval;

/// Interval coverage used for efficiency bands (one Gaussian sigma, rounded).
pub const DEFAULT_COVERAGE: f64 = 0.68;

/// Which counts enter the binomial interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountMode {
    /// Effective counts: both sums scaled by `sumw / sumw2` of the reference,
    /// so unit weights give the raw counts and weighted samples get an
    /// interval matching their statistical power.
    #[default]
    Effective,
    /// Raw sums of weights.
    WeightSums,
}

/// Efficiency estimator settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EfficiencyOptions {
    /// Interval coverage in (0, 1).
    pub coverage: f64,
    /// Count interpretation.
    pub count_mode: CountMode,
}

impl Default for EfficiencyOptions {
    fn default() -> Self {
        Self { coverage: DEFAULT_COVERAGE, count_mode: CountMode::default() }
    }
}

impl EfficiencyOptions {
    /// Path-safe rendering of the settings, e.g. `cov0p68__effective`.
    pub fn tag(&self) -> String {
        let mode = match self.count_mode {
            CountMode::Effective => "effective",
            CountMode::WeightSums => "weightsums",
        };
        format!("cov{}__{}", self.coverage.to_string().replace('.', "p"), mode)
    }
}

fn variable_axes(h: &WeightedHistogram) -> Result<Vec<AxisEdges>> {
    h.axes()
        .iter()
        .map(|a| {
            a.to_axis_edges().ok_or_else(|| {
                Error::Validation(format!(
                    "efficiency histograms must only have binned axes, found categorical '{}'",
                    a.name()
                ))
            })
        })
        .collect()
}

/// Efficiency of the `signal` (reference+signal) selection relative to the
/// `reference` selection, bin by bin, flow bins excluded.
///
/// `nominal = S / R`; `down`/`up` are the Clopper–Pearson bounds. Bins
/// without a valid proportion (empty or negative reference) are NaN.
pub fn compute_efficiency(
    reference: &WeightedHistogram,
    signal: &WeightedHistogram,
    options: &EfficiencyOptions,
) -> Result<EfficiencyResult> {
    if reference.axes() != signal.axes() {
        return Err(Error::Validation(
            "reference and signal histograms have different axes".into(),
        ));
    }
    let axes = variable_axes(reference)?;

    let r = reference.values(false)?;
    let r2 = reference.variances(false)?;
    let s = signal.values(false)?;
    let shape = r.shape().to_vec();

    let n = r.len();
    let mut nominal = Vec::with_capacity(n);
    let mut up = Vec::with_capacity(n);
    let mut down = Vec::with_capacity(n);
    for i in 0..n {
        let (sumw_r, sumw2_r, sumw_s) = (r.as_slice()[i], r2.as_slice()[i], s.as_slice()[i]);
        let eff = sumw_s / sumw_r;
        nominal.push(if eff.is_finite() { eff } else { f64::NAN });

        let (k, total) = match options.count_mode {
            CountMode::WeightSums => (sumw_s, sumw_r),
            CountMode::Effective => {
                let scale = sumw_r / sumw2_r;
                (sumw_s * scale, sumw_r * scale)
            }
        };
        let (lo, hi) = clopper_pearson_interval(k, total, options.coverage)?;
        down.push(lo);
        up.push(hi);
    }

    VariationSet::new(
        axes,
        NdArray::new(shape.clone(), nominal)?,
        NdArray::new(shape.clone(), up)?,
        NdArray::new(shape, down)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use tsf_hist::{Axis, FillCoord};

    fn axis() -> Axis {
        Axis::variable("ht", "H_T", vec![0.0, 1.0, 2.0, 3.0]).unwrap()
    }

    /// Unit-weight histogram with `counts[i]` entries in bin `i`.
    fn counts(counts: &[usize]) -> WeightedHistogram {
        let mut h = WeightedHistogram::new(vec![axis()]).unwrap();
        let values: Vec<f64> =
            counts.iter().enumerate().flat_map(|(i, &c)| std::iter::repeat_n(i as f64 + 0.5, c)).collect();
        h.fill(&[FillCoord::Values(&values)], &vec![1.0; values.len()]).unwrap();
        h
    }

    #[test]
    fn option_tags_tell_settings_apart() {
        let default = EfficiencyOptions::default();
        assert_eq!(default.tag(), "cov0p68__effective");
        let wide = EfficiencyOptions { coverage: 0.95, ..default };
        assert_eq!(wide.tag(), "cov0p95__effective");
        let sums = EfficiencyOptions { count_mode: CountMode::WeightSums, ..default };
        assert_eq!(sums.tag(), "cov0p68__weightsums");
    }

    #[test]
    fn unit_weight_scenario() {
        let reference = counts(&[100, 80, 50]);
        let signal = counts(&[90, 60, 25]);
        let eff = compute_efficiency(&reference, &signal, &EfficiencyOptions::default()).unwrap();

        assert_eq!(eff.nominal.as_slice(), &[0.9, 0.75, 0.5]);
        assert_eq!(eff.axes[0].name, "ht");
        for i in 0..3 {
            let (d, n, u) = (eff.down.as_slice()[i], eff.nominal.as_slice()[i], eff.up.as_slice()[i]);
            assert!(0.0 <= d && d <= n && n <= u && u <= 1.0);
        }
        assert_relative_eq!(eff.down.as_slice()[0], 0.860_595_800_094_806_9, epsilon = 1e-9);
        assert_relative_eq!(eff.up.as_slice()[0], 0.930_199_062_594_142_6, epsilon = 1e-9);
        assert_relative_eq!(eff.down.as_slice()[2], 0.420_583_513_683_792_9, epsilon = 1e-9);
        assert_relative_eq!(eff.up.as_slice()[2], 0.579_416_486_316_207, epsilon = 1e-9);
    }

    #[test]
    fn empty_reference_bin_is_nan() {
        let reference = counts(&[10, 0, 5]);
        let signal = counts(&[5, 0, 5]);
        let eff = compute_efficiency(&reference, &signal, &EfficiencyOptions::default()).unwrap();
        assert!(eff.nominal.as_slice()[1].is_nan());
        assert!(eff.up.as_slice()[1].is_nan() && eff.down.as_slice()[1].is_nan());
        assert_eq!(eff.nominal.as_slice()[2], 1.0);
        assert_eq!(eff.up.as_slice()[2], 1.0);
    }

    #[test]
    fn effective_counts_follow_weight_scale() {
        // Uniform weights w: effective counts equal raw counts.
        let mut reference = WeightedHistogram::new(vec![axis()]).unwrap();
        let mut signal = WeightedHistogram::new(vec![axis()]).unwrap();
        reference.fill(&[FillCoord::Values(&vec![0.5; 40])], &vec![0.25; 40]).unwrap();
        signal.fill(&[FillCoord::Values(&vec![0.5; 10])], &vec![0.25; 10]).unwrap();

        let eff = compute_efficiency(&reference, &signal, &EfficiencyOptions::default()).unwrap();
        let (lo, hi) = clopper_pearson_interval(10.0, 40.0, DEFAULT_COVERAGE).unwrap();
        assert_relative_eq!(eff.nominal.as_slice()[0], 0.25, epsilon = 1e-15);
        assert_relative_eq!(eff.down.as_slice()[0], lo, epsilon = 1e-12);
        assert_relative_eq!(eff.up.as_slice()[0], hi, epsilon = 1e-12);

        let raw = EfficiencyOptions { count_mode: CountMode::WeightSums, ..Default::default() };
        let eff = compute_efficiency(&reference, &signal, &raw).unwrap();
        let (lo, hi) = clopper_pearson_interval(2.5, 10.0, DEFAULT_COVERAGE).unwrap();
        assert_relative_eq!(eff.down.as_slice()[0], lo, epsilon = 1e-12);
        assert_relative_eq!(eff.up.as_slice()[0], hi, epsilon = 1e-12);
    }

    #[test]
    fn categorical_axes_are_rejected() {
        let h = WeightedHistogram::new(vec![Axis::category("process", ["data"]).unwrap(), axis()])
            .unwrap();
        assert!(compute_efficiency(&h, &h, &EfficiencyOptions::default()).is_err());
        let other = WeightedHistogram::new(vec![Axis::variable("met", "", vec![0.0, 1.0]).unwrap()])
            .unwrap();
        assert!(compute_efficiency(&counts(&[1, 1, 1]), &other, &EfficiencyOptions::default()).is_err());
    }

    proptest! {
        #[test]
        fn bounds_are_ordered(
            rows in proptest::collection::vec((0.0f64..3.0, 0.1f64..2.0, any::<bool>()), 1..200)
        ) {
            let mut reference = WeightedHistogram::new(vec![axis()]).unwrap();
            let mut signal = WeightedHistogram::new(vec![axis()]).unwrap();
            let x: Vec<f64> = rows.iter().map(|r| r.0).collect();
            let w: Vec<f64> = rows.iter().map(|r| r.1).collect();
            let xs: Vec<f64> = rows.iter().filter(|r| r.2).map(|r| r.0).collect();
            let ws: Vec<f64> = rows.iter().filter(|r| r.2).map(|r| r.1).collect();
            reference.fill(&[FillCoord::Values(&x)], &w).unwrap();
            signal.fill(&[FillCoord::Values(&xs)], &ws).unwrap();

            let eff = compute_efficiency(&reference, &signal, &EfficiencyOptions::default()).unwrap();
            let r = reference.values(false).unwrap();
            for i in 0..eff.nominal.len() {
                if r.as_slice()[i] <= 0.0 {
                    continue;
                }
                let (d, n, u) = (eff.down.as_slice()[i], eff.nominal.as_slice()[i], eff.up.as_slice()[i]);
                prop_assert!(0.0 <= d && d <= n && n <= u && u <= 1.0, "bin {}: {} {} {}", i, d, n, u);
            }
        }
    }
}
