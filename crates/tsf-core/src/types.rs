//! Common numeric containers persisted by pipeline stages

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dense row-major N-dimensional array of `f64`.
///
/// Non-finite cells (the NaN "undefined" marker) are stored as `null` in JSON
/// and read back as NaN. Deserialization checks the shape like [`NdArray::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNdArray")]
pub struct NdArray {
    shape: Vec<usize>,
    #[serde(serialize_with = "nan_as_null::serialize")]
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawNdArray {
    shape: Vec<usize>,
    #[serde(deserialize_with = "nan_as_null::deserialize")]
    data: Vec<f64>,
}

impl TryFrom<RawNdArray> for NdArray {
    type Error = Error;

    fn try_from(raw: RawNdArray) -> Result<Self> {
        NdArray::new(raw.shape, raw.data)
    }
}

impl NdArray {
    /// Wrap `data` with the given `shape`; the element counts must agree.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if n != data.len() {
            return Err(Error::Validation(format!(
                "array shape {:?} needs {} elements, got {}",
                shape,
                n,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Array of zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self { shape, data: vec![0.0; n] }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major data.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Consume into the flat data vector.
    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at a multi-index, `None` when out of range.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&i, &n) in index.iter().zip(&self.shape) {
            if i >= n {
                return None;
            }
            flat = flat * n + i;
        }
        self.data.get(flat).copied()
    }

    /// Element-wise combination of two same-shaped arrays.
    pub fn zip_map(&self, other: &NdArray, f: impl Fn(f64, f64) -> f64) -> Result<NdArray> {
        if self.shape != other.shape {
            return Err(Error::Validation(format!(
                "shape mismatch: {:?} vs {:?}",
                self.shape, other.shape
            )));
        }
        let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
        Ok(NdArray { shape: self.shape.clone(), data })
    }
}

/// Bin edges and display title of one variable axis of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEdges {
    /// Variable name.
    pub name: String,
    /// Display title including unit.
    pub title: String,
    /// Bin edges (length = n_bins + 1).
    pub edges: Vec<f64>,
}

impl AxisEdges {
    /// Number of regular bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len().saturating_sub(1)
    }
}

/// Nominal value plus up/down variations over the same variable bins.
///
/// This is the persisted archive for both efficiencies and scale factors.
/// Loading an archive runs the same checks as [`VariationSet::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVariationSet")]
pub struct VariationSet {
    /// Variable axes, outermost first.
    pub axes: Vec<AxisEdges>,
    /// Central values.
    pub nominal: NdArray,
    /// Upper variation.
    pub up: NdArray,
    /// Lower variation.
    pub down: NdArray,
}

#[derive(Deserialize)]
struct RawVariationSet {
    axes: Vec<AxisEdges>,
    nominal: NdArray,
    up: NdArray,
    down: NdArray,
}

impl TryFrom<RawVariationSet> for VariationSet {
    type Error = Error;

    fn try_from(raw: RawVariationSet) -> Result<Self> {
        VariationSet::new(raw.axes, raw.nominal, raw.up, raw.down)
    }
}

/// Binomial efficiency with its Clopper–Pearson band (`down`/`up`).
pub type EfficiencyResult = VariationSet;

/// Data/simulation efficiency ratio with its propagated band.
pub type ScaleFactorResult = VariationSet;

impl VariationSet {
    /// Build a set, checking that all arrays match the axes.
    pub fn new(axes: Vec<AxisEdges>, nominal: NdArray, up: NdArray, down: NdArray) -> Result<Self> {
        let shape: Vec<usize> = axes.iter().map(AxisEdges::n_bins).collect();
        for (name, arr) in [("nominal", &nominal), ("up", &up), ("down", &down)] {
            if arr.shape() != shape.as_slice() {
                return Err(Error::Validation(format!(
                    "'{name}' has shape {:?}, axes imply {:?}",
                    arr.shape(),
                    shape
                )));
            }
        }
        Ok(Self { axes, nominal, up, down })
    }

    /// Variation by name (`nominal`, `up`, `down`).
    pub fn variation(&self, name: &str) -> Option<&NdArray> {
        match name {
            "nominal" => Some(&self.nominal),
            "up" => Some(&self.up),
            "down" => Some(&self.down),
            _ => None,
        }
    }

    /// Names of the stored variations, in archive order.
    pub fn variation_names() -> [&'static str; 3] {
        ["nominal", "up", "down"]
    }
}

mod nan_as_null {
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[f64], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(data.len()))?;
        for v in data {
            if v.is_finite() {
                seq.serialize_element(v)?;
            } else {
                seq.serialize_element(&None::<f64>)?;
            }
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(d)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }
}
