//! Probability building blocks for efficiency estimation.
//!
//! - [`beta`]: regularized incomplete beta CDF and its inverse
//! - [`binomial`]: exact (Clopper–Pearson) binomial proportion intervals

pub mod beta;
pub mod binomial;

pub use binomial::clopper_pearson_interval;
