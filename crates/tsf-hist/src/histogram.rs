//! Weighted histogram storage, filling and reduction.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tsf_core::{Error, NdArray, Result};

use crate::axis::Axis;

/// Rows per parallel bin-lookup work item.
pub const FILL_CHUNK_SIZE: usize = 16_384;

/// Per-axis input to [`WeightedHistogram::fill`].
#[derive(Debug, Clone, Copy)]
pub enum FillCoord<'a> {
    /// The same label for every row (categorical axes).
    Label(&'a str),
    /// One value per row (binned axes).
    Values(&'a [f64]),
}

/// N-dimensional histogram with sum-of-weights and sum-of-squared-weights
/// per cell. Storage is row-major over [`Axis::size`], last axis fastest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedHistogram {
    axes: Vec<Axis>,
    sumw: Vec<f64>,
    sumw2: Vec<f64>,
    entries: u64,
}

enum Resolved<'a> {
    Fixed(usize),
    PerRow(&'a Axis, &'a [f64]),
}

fn ravel(index: &[usize], shape: &[usize]) -> usize {
    index.iter().zip(shape).fold(0, |flat, (&i, &n)| flat * n + i)
}

fn unravel(mut flat: usize, shape: &[usize], out: &mut [usize]) {
    for (slot, &n) in out.iter_mut().zip(shape).rev() {
        *slot = flat % n;
        flat /= n;
    }
}

impl WeightedHistogram {
    /// Empty histogram over `axes`. Axis names must be unique.
    pub fn new(axes: Vec<Axis>) -> Result<Self> {
        for (i, axis) in axes.iter().enumerate() {
            axis.validate()?;
            if axes[..i].iter().any(|a| a.name() == axis.name()) {
                return Err(Error::Validation(format!("duplicate axis '{}'", axis.name())));
            }
        }
        let n = axes.iter().map(Axis::size).product();
        Ok(Self { axes, sumw: vec![0.0; n], sumw2: vec![0.0; n], entries: 0 })
    }

    /// Parse from JSON and check storage against the axes.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let h: WeightedHistogram = serde_json::from_slice(bytes)?;
        let expected = Self::new(h.axes.clone())?;
        if h.sumw.len() != expected.sumw.len() || h.sumw2.len() != expected.sumw2.len() {
            return Err(Error::Validation(format!(
                "histogram storage has {} cells, axes need {}",
                h.sumw.len(),
                expected.sumw.len()
            )));
        }
        Ok(h)
    }

    /// Serialize to pretty JSON.
    ///
    /// Non-finite sums have no JSON number and are a data error.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let bad = self.sumw.iter().zip(&self.sumw2).position(|(w, w2)| !w.is_finite() || !w2.is_finite());
        if let Some(cell) = bad {
            return Err(Error::Data(format!(
                "non-finite sum of weights in histogram cell {} (sumw {}, sumw2 {})",
                cell, self.sumw[cell], self.sumw2[cell]
            )));
        }
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Axes, outermost first.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Axis by name.
    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name() == name)
    }

    fn axis_position(&self, name: &str) -> Result<usize> {
        self.axes.iter().position(|a| a.name() == name).ok_or_else(|| Error::NotFound {
            kind: "axis",
            name: name.to_string(),
        })
    }

    fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::size).collect()
    }

    /// Number of rows filled so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Fill one row per entry of `weights`.
    ///
    /// `coords` has one entry per axis: a [`FillCoord::Label`] for categorical
    /// axes, [`FillCoord::Values`] of the same length as `weights` for binned
    /// axes. Unknown labels are a validation error.
    pub fn fill(&mut self, coords: &[FillCoord<'_>], weights: &[f64]) -> Result<()> {
        if coords.len() != self.axes.len() {
            return Err(Error::Validation(format!(
                "fill needs {} coordinates, got {}",
                self.axes.len(),
                coords.len()
            )));
        }
        let n = weights.len();

        let mut resolved = Vec::with_capacity(coords.len());
        for (axis, coord) in self.axes.iter().zip(coords) {
            let r = match (axis, coord) {
                (Axis::Category { .. }, FillCoord::Label(label)) => {
                    let idx = axis.label_index(label).ok_or_else(|| {
                        Error::Validation(format!(
                            "label '{}' is not on axis '{}'",
                            label,
                            axis.name()
                        ))
                    })?;
                    Resolved::Fixed(idx)
                }
                (Axis::Variable { .. }, FillCoord::Values(values)) => {
                    if values.len() != n {
                        return Err(Error::Validation(format!(
                            "axis '{}': {} values for {} weights",
                            axis.name(),
                            values.len(),
                            n
                        )));
                    }
                    Resolved::PerRow(axis, values)
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "coordinate kind does not match axis '{}'",
                        axis.name()
                    )));
                }
            };
            resolved.push(r);
        }

        let shape = self.shape();
        let mut cells = vec![0usize; n];
        cells.par_chunks_mut(FILL_CHUNK_SIZE).enumerate().for_each(|(chunk, slot)| {
            let start = chunk * FILL_CHUNK_SIZE;
            for (offset, cell) in slot.iter_mut().enumerate() {
                let row = start + offset;
                let mut flat = 0usize;
                for (r, &size) in resolved.iter().zip(&shape) {
                    let idx = match r {
                        Resolved::Fixed(i) => *i,
                        // Binned axes always resolve.
                        Resolved::PerRow(axis, values) => axis.bin_index(values[row]).unwrap_or(0),
                    };
                    flat = flat * size + idx;
                }
                *cell = flat;
            }
        });

        for (&cell, &w) in cells.iter().zip(weights) {
            self.sumw[cell] += w;
            self.sumw2[cell] += w * w;
        }
        self.entries += n as u64;
        Ok(())
    }

    /// Cell-wise sum with a histogram over identical axes.
    pub fn try_add(&mut self, other: &WeightedHistogram) -> Result<()> {
        if self.axes != other.axes {
            return Err(Error::Validation("cannot add histograms with different axes".into()));
        }
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Restrict a categorical axis to `labels`, in the given order.
    pub fn select(&self, axis: &str, labels: &[&str]) -> Result<Self> {
        let k = self.axis_position(axis)?;
        let old = &self.axes[k];
        if !old.is_categorical() {
            return Err(Error::Validation(format!("axis '{}' is not categorical", axis)));
        }
        let mut picks = Vec::with_capacity(labels.len());
        for label in labels {
            picks.push(old.label_index(label).ok_or_else(|| {
                Error::Validation(format!("label '{}' is not on axis '{}'", label, axis))
            })?);
        }

        let mut axes = self.axes.clone();
        axes[k] = Axis::category(axis, labels.iter().copied())?;
        let mut out = Self::new(axes)?;
        out.entries = self.entries;

        let src_shape = self.shape();
        let dst_shape = out.shape();
        let mut index = vec![0usize; dst_shape.len()];
        for dst in 0..out.sumw.len() {
            unravel(dst, &dst_shape, &mut index);
            index[k] = picks[index[k]];
            let src = ravel(&index, &src_shape);
            out.sumw[dst] = self.sumw[src];
            out.sumw2[dst] = self.sumw2[src];
        }
        Ok(out)
    }

    /// Integrate `axis` away, flow bins included.
    pub fn sum_axis(&self, axis: &str) -> Result<Self> {
        let k = self.axis_position(axis)?;
        let mut axes = self.axes.clone();
        axes.remove(k);
        let mut out = Self::new(axes)?;
        out.entries = self.entries;

        let src_shape = self.shape();
        let dst_shape = out.shape();
        let mut index = vec![0usize; src_shape.len()];
        for src in 0..self.sumw.len() {
            unravel(src, &src_shape, &mut index);
            let mut reduced = index.clone();
            reduced.remove(k);
            let dst = ravel(&reduced, &dst_shape);
            out.sumw[dst] += self.sumw[src];
            out.sumw2[dst] += self.sumw2[src];
        }
        Ok(out)
    }

    fn project(&self, data: &[f64], flow: bool) -> Result<NdArray> {
        if flow {
            return NdArray::new(self.shape(), data.to_vec());
        }
        let src_shape = self.shape();
        let dst_shape: Vec<usize> = self.axes.iter().map(Axis::n_bins).collect();
        let offsets: Vec<usize> =
            self.axes.iter().map(|a| usize::from(!a.is_categorical())).collect();
        let n: usize = dst_shape.iter().product();
        let mut out = Vec::with_capacity(n);
        let mut index = vec![0usize; dst_shape.len()];
        for dst in 0..n {
            unravel(dst, &dst_shape, &mut index);
            for (i, off) in index.iter_mut().zip(&offsets) {
                *i += off;
            }
            out.push(data[ravel(&index, &src_shape)]);
        }
        NdArray::new(dst_shape, out)
    }

    /// Sums of weights. Without `flow`, under- and overflow bins are dropped.
    pub fn values(&self, flow: bool) -> Result<NdArray> {
        self.project(&self.sumw, flow)
    }

    /// Sums of squared weights, shaped like [`values`](Self::values).
    pub fn variances(&self, flow: bool) -> Result<NdArray> {
        self.project(&self.sumw2, flow)
    }
}

/// Sum histograms over identical axes. An empty input is an error.
pub fn sum_histograms<'a>(
    hists: impl IntoIterator<Item = &'a WeightedHistogram>,
) -> Result<WeightedHistogram> {
    let mut iter = hists.into_iter();
    let mut total =
        iter.next().cloned().ok_or_else(|| Error::Validation("no histograms to sum".into()))?;
    for h in iter {
        total.try_add(h)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hist() -> WeightedHistogram {
        WeightedHistogram::new(vec![
            Axis::category("category", ["incl", "sig"]).unwrap(),
            Axis::category("process", ["data", "dyjets"]).unwrap(),
            Axis::variable("met", "MET", vec![0.0, 10.0, 20.0]).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn non_finite_sums_are_not_serialized() {
        let mut h = WeightedHistogram::new(vec![Axis::variable("met", "MET", vec![0.0, 10.0]).unwrap()])
            .unwrap();
        h.fill(&[FillCoord::Values(&[5.0, 5.0])], &[1.0, f64::INFINITY]).unwrap();
        assert!(matches!(h.to_json(), Err(Error::Data(_))));

        let mut ok = hist();
        ok.fill(&[FillCoord::Label("sig"), FillCoord::Label("data"), FillCoord::Values(&[5.0])], &[2.0])
            .unwrap();
        let back = WeightedHistogram::from_json(&ok.to_json().unwrap()).unwrap();
        assert_eq!(back, ok);
    }

    #[test]
    fn fill_and_project() {
        let mut h = hist();
        let met = [5.0, 15.0, 15.0, -1.0, 25.0, f64::NAN];
        let w = [1.0, 2.0, 0.5, 1.0, 3.0, 1.0];
        h.fill(&[FillCoord::Label("sig"), FillCoord::Label("dyjets"), FillCoord::Values(&met)], &w)
            .unwrap();
        assert_eq!(h.entries(), 6);

        let vals = h.values(false).unwrap();
        assert_eq!(vals.shape(), &[2, 2, 2]);
        assert_eq!(vals.get(&[1, 1, 0]), Some(1.0));
        assert_eq!(vals.get(&[1, 1, 1]), Some(2.5));
        assert_eq!(vals.get(&[0, 1, 1]), Some(0.0));

        let vars = h.variances(false).unwrap();
        assert_eq!(vars.get(&[1, 1, 1]), Some(4.25));

        let full = h.values(true).unwrap();
        assert_eq!(full.shape(), &[2, 2, 4]);
        assert_eq!(full.get(&[1, 1, 0]), Some(1.0)); // underflow
        assert_eq!(full.get(&[1, 1, 3]), Some(4.0)); // overflow incl. NaN
    }

    #[test]
    fn unknown_label_is_rejected() {
        let mut h = hist();
        let err = h
            .fill(&[FillCoord::Label("incl"), FillCoord::Label("ttbar"), FillCoord::Values(&[1.0])], &[1.0])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.entries(), 0);
    }

    #[test]
    fn mismatched_coordinates_are_rejected() {
        let mut h = hist();
        assert!(h.fill(&[FillCoord::Label("incl")], &[1.0]).is_err());
        assert!(
            h.fill(
                &[FillCoord::Label("incl"), FillCoord::Label("data"), FillCoord::Values(&[1.0, 2.0])],
                &[1.0]
            )
            .is_err()
        );
        assert!(
            h.fill(
                &[FillCoord::Values(&[1.0]), FillCoord::Label("data"), FillCoord::Values(&[1.0])],
                &[1.0]
            )
            .is_err()
        );
    }

    #[test]
    fn select_and_sum_axis() {
        let mut h = hist();
        h.fill(&[FillCoord::Label("incl"), FillCoord::Label("data"), FillCoord::Values(&[1.0, 12.0])], &[1.0, 1.0])
            .unwrap();
        h.fill(&[FillCoord::Label("incl"), FillCoord::Label("dyjets"), FillCoord::Values(&[1.0])], &[0.5])
            .unwrap();
        h.fill(&[FillCoord::Label("sig"), FillCoord::Label("data"), FillCoord::Values(&[12.0])], &[1.0])
            .unwrap();

        let incl = h.select("category", &["incl"]).unwrap().sum_axis("category").unwrap();
        let both = incl.select("process", &["dyjets", "data"]).unwrap();
        assert_eq!(both.axis("process").unwrap().labels().unwrap(), ["dyjets", "data"]);
        let v = both.sum_axis("process").unwrap().values(false).unwrap();
        assert_eq!(v.as_slice(), &[1.5, 1.0]);

        assert!(h.select("met", &["x"]).is_err());
        assert!(h.select("process", &["ttbar"]).is_err());
        assert!(matches!(h.sum_axis("pt"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn json_roundtrip_checks_storage() {
        let mut h = hist();
        h.fill(&[FillCoord::Label("incl"), FillCoord::Label("data"), FillCoord::Values(&[3.0])], &[2.0])
            .unwrap();
        let bytes = h.to_json().unwrap();
        assert_eq!(WeightedHistogram::from_json(&bytes).unwrap(), h);

        let mut doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        doc["sumw"].as_array_mut().unwrap().pop();
        let broken = serde_json::to_vec(&doc).unwrap();
        assert!(WeightedHistogram::from_json(&broken).is_err());
    }

    #[test]
    fn adding_requires_identical_axes() {
        let mut a = hist();
        let b = WeightedHistogram::new(vec![Axis::variable("met", "MET", vec![0.0, 1.0]).unwrap()])
            .unwrap();
        assert!(a.try_add(&b).is_err());
        assert!(sum_histograms(std::iter::empty()).is_err());
    }

    fn filled(weights: &[i32], values: &[f64]) -> WeightedHistogram {
        let mut h = WeightedHistogram::new(vec![
            Axis::variable("x", "x", vec![0.0, 1.0, 2.0, 4.0]).unwrap(),
        ])
        .unwrap();
        let w: Vec<f64> = weights.iter().map(|&w| f64::from(w)).collect();
        h.fill(&[FillCoord::Values(values)], &w).unwrap();
        h
    }

    proptest! {
        // Integer weights keep every partial sum exact.
        #[test]
        fn summation_is_associative_and_commutative(
            rows in proptest::collection::vec((-8i32..8, -1.0f64..5.0), 0..40),
            split_a in 0usize..40,
            split_b in 0usize..40,
        ) {
            let (w, x): (Vec<i32>, Vec<f64>) = rows.iter().copied().unzip();
            let n = rows.len();
            let (i, j) = (split_a.min(n).min(split_b.min(n)), split_a.min(n).max(split_b.min(n)));
            let a = filled(&w[..i], &x[..i]);
            let b = filled(&w[i..j], &x[i..j]);
            let c = filled(&w[j..], &x[j..]);

            let left = sum_histograms([&sum_histograms([&a, &b]).unwrap(), &c]).unwrap();
            let right = sum_histograms([&a, &sum_histograms([&b, &c]).unwrap()]).unwrap();
            let swapped = sum_histograms([&c, &b, &a]).unwrap();
            let whole = filled(&w, &x);

            prop_assert_eq!(&left, &right);
            prop_assert_eq!(&left, &swapped);
            prop_assert_eq!(&left, &whole);
        }
    }
}
