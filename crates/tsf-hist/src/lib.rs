//! # tsf-hist
//!
//! Weighted histograms over mixed categorical and binned axes.
//!
//! Each cell stores the sum of weights and the sum of squared weights.
//! Binned axes carry an underflow and an overflow bin; categorical axes have
//! exactly one bin per label.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod axis;
pub mod histogram;

pub use axis::Axis;
pub use histogram::{FILL_CHUNK_SIZE, FillCoord, WeightedHistogram, sum_histograms};
