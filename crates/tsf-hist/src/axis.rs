//! Histogram axes.

use serde::{Deserialize, Serialize};
use tsf_core::{AxisEdges, Error, Result};

/// One axis of a [`WeightedHistogram`](crate::WeightedHistogram).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Axis {
    /// Fixed set of string labels, one bin each.
    Category {
        /// Axis name.
        name: String,
        /// Bin labels, in storage order.
        labels: Vec<String>,
    },
    /// Variable-width bins plus underflow and overflow.
    Variable {
        /// Axis name.
        name: String,
        /// Display title.
        title: String,
        /// Strictly increasing bin edges (at least two).
        edges: Vec<f64>,
    },
}

impl Axis {
    /// Categorical axis. Labels must be unique.
    pub fn category<S: Into<String>>(
        name: &str,
        labels: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let axis = Axis::Category {
            name: name.to_string(),
            labels: labels.into_iter().map(Into::into).collect(),
        };
        axis.validate()?;
        Ok(axis)
    }

    /// Binned axis over `edges`.
    pub fn variable(name: &str, title: &str, edges: Vec<f64>) -> Result<Self> {
        let axis =
            Axis::Variable { name: name.to_string(), title: title.to_string(), edges };
        axis.validate()?;
        Ok(axis)
    }

    /// Check the axis invariants (unique labels, increasing finite edges).
    pub fn validate(&self) -> Result<()> {
        match self {
            Axis::Category { name, labels } => {
                for (i, label) in labels.iter().enumerate() {
                    if labels[..i].contains(label) {
                        return Err(Error::Validation(format!(
                            "axis '{}': duplicate label '{}'",
                            name, label
                        )));
                    }
                }
            }
            Axis::Variable { name, edges, .. } => {
                if edges.len() < 2 {
                    return Err(Error::Validation(format!(
                        "axis '{}': need at least 2 bin edges, got {}",
                        name,
                        edges.len()
                    )));
                }
                if edges.iter().any(|e| !e.is_finite())
                    || edges.windows(2).any(|w| w[1] <= w[0])
                {
                    return Err(Error::Validation(format!(
                        "axis '{}': bin edges must be finite and strictly increasing: {:?}",
                        name, edges
                    )));
                }
            }
        }
        Ok(())
    }

    /// Axis name.
    pub fn name(&self) -> &str {
        match self {
            Axis::Category { name, .. } | Axis::Variable { name, .. } => name,
        }
    }

    /// `true` for categorical axes.
    pub fn is_categorical(&self) -> bool {
        matches!(self, Axis::Category { .. })
    }

    /// Number of storage bins, flow bins included.
    pub fn size(&self) -> usize {
        match self {
            Axis::Category { labels, .. } => labels.len(),
            Axis::Variable { edges, .. } => edges.len() + 1,
        }
    }

    /// Number of bins without flow bins.
    pub fn n_bins(&self) -> usize {
        match self {
            Axis::Category { labels, .. } => labels.len(),
            Axis::Variable { edges, .. } => edges.len() - 1,
        }
    }

    /// Category labels; `None` for binned axes.
    pub fn labels(&self) -> Option<&[String]> {
        match self {
            Axis::Category { labels, .. } => Some(labels),
            Axis::Variable { .. } => None,
        }
    }

    /// Bin edges; `None` for categorical axes.
    pub fn edges(&self) -> Option<&[f64]> {
        match self {
            Axis::Variable { edges, .. } => Some(edges),
            Axis::Category { .. } => None,
        }
    }

    /// Storage index of `label`.
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels()?.iter().position(|l| l == label)
    }

    /// Storage index of `value` on a binned axis: 0 is underflow, `n_bins + 1`
    /// is overflow. NaN goes to overflow.
    ///
    /// Categorical axes have no numeric lookup and return `None`.
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        let edges = self.edges()?;
        let last = edges.len() - 1;
        if value.is_nan() || value >= edges[last] {
            return Some(last + 1);
        }
        if value < edges[0] {
            return Some(0);
        }
        // First edge strictly greater than value; value lies in bin idx - 1.
        let idx = edges.partition_point(|e| *e <= value);
        Some(idx)
    }

    /// Edges and title of a binned axis, as stored in result archives.
    pub fn to_axis_edges(&self) -> Option<AxisEdges> {
        match self {
            Axis::Variable { name, title, edges } => {
                Some(AxisEdges { name: name.clone(), title: title.clone(), edges: edges.clone() })
            }
            Axis::Category { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_lookup_with_flow() {
        let ax = Axis::variable("met", "MET", vec![0.0, 10.0, 20.0, 50.0]).unwrap();
        assert_eq!(ax.size(), 5);
        assert_eq!(ax.bin_index(-1.0), Some(0));
        assert_eq!(ax.bin_index(0.0), Some(1));
        assert_eq!(ax.bin_index(9.99), Some(1));
        assert_eq!(ax.bin_index(10.0), Some(2));
        assert_eq!(ax.bin_index(49.0), Some(3));
        assert_eq!(ax.bin_index(50.0), Some(4));
        assert_eq!(ax.bin_index(f64::NAN), Some(4));
        assert_eq!(ax.bin_index(f64::INFINITY), Some(4));
        assert_eq!(ax.bin_index(f64::NEG_INFINITY), Some(0));
    }

    #[test]
    fn invalid_axes() {
        assert!(Axis::variable("x", "x", vec![1.0]).is_err());
        assert!(Axis::variable("x", "x", vec![0.0, 0.0]).is_err());
        assert!(Axis::variable("x", "x", vec![0.0, f64::NAN]).is_err());
        assert!(Axis::category("c", ["a", "b", "a"]).is_err());
    }

    #[test]
    fn labels() {
        let ax = Axis::category("process", ["data", "dyjets"]).unwrap();
        assert!(ax.is_categorical());
        assert_eq!(ax.label_index("dyjets"), Some(1));
        assert_eq!(ax.label_index("ttbar"), None);
        assert_eq!(ax.bin_index(1.0), None);
        assert!(ax.to_axis_edges().is_none());
    }
}
