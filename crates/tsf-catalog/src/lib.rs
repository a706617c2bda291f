//! # tsf-catalog
//!
//! Read-only catalog of the objects a trigger study is parameterized by:
//! campaigns, a process tree, datasets, variables, channels and categories.
//!
//! Catalogs are loaded once from an analysis YAML file plus a sample
//! database and never mutated afterwards; pipeline stages share them through
//! `Arc`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod loader;
pub mod objects;
pub mod process;

pub use config::{Analysis, Config};
pub use loader::{SampleEntry, load_analysis, parse_analysis, read_sample_database};
pub use objects::{Campaign, Category, Channel, ChannelSelection, Dataset, Predicate, Variable};
pub use process::{Process, ProcessId, ProcessTree};
