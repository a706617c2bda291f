//! # tsf-analysis
//!
//! Trigger efficiency measurement on top of the catalog, event frames,
//! histograms and the stage pipeline.
//!
//! - [`selection`]: weight production, channel and category selection
//! - [`efficiency`]: Clopper–Pearson efficiencies from reference and
//!   reference+signal histograms
//! - [`scalefactor`]: data/simulation efficiency ratios
//! - [`tasks`]: the pipeline stages tying everything together
//! - [`present`]: CSV and text tables of result archives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod efficiency;
pub mod present;
pub mod scalefactor;
pub mod selection;
pub mod tasks;

pub use efficiency::{CountMode, DEFAULT_COVERAGE, EfficiencyOptions, compute_efficiency};
pub use scalefactor::{combine_scale_factors, safe_ratio};
pub use selection::{
    NORM_WEIGHT, SelectionContext, SelectionState, TOTAL_WEIGHT, apply_selection,
    category_selection, channel_selection, weight_production,
};
pub use tasks::{
    AnalysisContext, CATEGORY_AXIS, CalculateEfficiencies, CalculateScaleFactors, CreateHistograms,
    EfficiencyParams, PROCESS_AXIS, TabulateEfficiencies, TabulateScaleFactors,
    hadronic_recoil_workflow,
};
