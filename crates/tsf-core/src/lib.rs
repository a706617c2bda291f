//! # tsf-core
//!
//! Shared building blocks for the trigger scale factor workspace: the common
//! [`Error`] type and the numeric containers ([`NdArray`], [`VariationSet`])
//! that efficiency and scale factor stages persist.

#![warn(missing_docs)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{AxisEdges, EfficiencyResult, NdArray, ScaleFactorResult, VariationSet};
