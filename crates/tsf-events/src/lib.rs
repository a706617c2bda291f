//! # tsf-events
//!
//! Columnar event access for trigger studies.
//!
//! An [`EventFrame`] is an immutable view over a column source (Parquet files
//! or in-memory columns) with a recorded chain of column definitions and row
//! filters written as string expressions. Nothing is read until a frame is
//! materialized.
//!
//! ```no_run
//! use std::path::PathBuf;
//! use tsf_events::EventFrame;
//!
//! let files = vec![PathBuf::from("events.parquet")];
//! let frame = EventFrame::open(&files, "Events").unwrap();
//! let sel = frame.filter("nMuon == 2", "two_muons").unwrap();
//! let cols = sel.as_arrays(&["MET_pt"]).unwrap();
//! println!("{} selected", cols["MET_pt"].len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod expr;
pub mod frame;
pub mod parquet;

pub use expr::{CompiledExpr, DEFAULT_CHUNK_SIZE, sanitize_expression};
pub use frame::{ColumnSource, CutFlowEntry, EventFrame, LoadedColumns, MemorySource};
pub use crate::parquet::{ParquetSource, TREE_METADATA_KEY, write_parquet};
