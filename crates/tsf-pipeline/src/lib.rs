//! # tsf-pipeline
//!
//! Memoized computation stages with on-disk artifacts.
//!
//! A [`Stage`] is identified by a [`StageId`] (kind, version, config and an
//! ordered parameter tuple). Its single artifact lives at a path derived from
//! that identity inside a [`LocalStore`]; once published it is never rewritten.
//! The [`Scheduler`] resolves upstream stages, skips complete ones and runs
//! the rest level by level.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod scheduler;
pub mod stage;
pub mod store;

pub use scheduler::{BuildSummary, Scheduler};
pub use stage::{Inputs, Stage, StageId};
pub use store::{LocalStore, Publish, STORE_ENV, Target};
