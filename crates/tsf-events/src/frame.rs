//! Lazy, immutable event frames: column definitions and row filters over a
//! columnar event source.
//!
//! [`EventFrame::define`] and [`EventFrame::filter`] never touch event data;
//! they validate the referenced columns and return a new frame with one more
//! operation recorded. Data is read and evaluated only by the materializing
//! calls ([`EventFrame::as_arrays`], [`EventFrame::count`],
//! [`EventFrame::cut_flow`]), and only for the columns they need.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tsf_core::{Error, Result};

use crate::expr::CompiledExpr;
use crate::parquet::ParquetSource;

/// Column store an [`EventFrame`] reads from.
pub trait ColumnSource: Send + Sync + fmt::Debug {
    /// Names of all readable columns.
    fn column_names(&self) -> &[String];

    /// Read the given columns. All returned columns have the same length.
    fn load(&self, names: &[String]) -> Result<LoadedColumns>;
}

/// Columns read from a [`ColumnSource`].
#[derive(Debug, Default)]
pub struct LoadedColumns {
    /// Number of rows.
    pub n_rows: usize,
    /// Column data by name.
    pub columns: HashMap<String, Arc<Vec<f64>>>,
}

/// In-memory column store.
#[derive(Debug)]
pub struct MemorySource {
    names: Vec<String>,
    columns: HashMap<String, Arc<Vec<f64>>>,
    n_rows: usize,
}

impl MemorySource {
    /// Build from named columns of equal length.
    pub fn new(columns: impl IntoIterator<Item = (String, Vec<f64>)>) -> Result<Self> {
        let mut names = Vec::new();
        let mut map = HashMap::new();
        let mut n_rows: Option<usize> = None;
        for (name, col) in columns {
            if let Some(n) = n_rows {
                if col.len() != n {
                    return Err(Error::Validation(format!(
                        "column length mismatch for '{}': expected {}, got {}",
                        name,
                        n,
                        col.len()
                    )));
                }
            } else {
                n_rows = Some(col.len());
            }
            if map.insert(name.clone(), Arc::new(col)).is_some() {
                return Err(Error::Validation(format!("duplicate column '{}'", name)));
            }
            names.push(name);
        }
        Ok(Self { names, columns: map, n_rows: n_rows.unwrap_or(0) })
    }
}

impl ColumnSource for MemorySource {
    fn column_names(&self) -> &[String] {
        &self.names
    }

    fn load(&self, names: &[String]) -> Result<LoadedColumns> {
        let mut columns = HashMap::with_capacity(names.len());
        for name in names {
            let col = self.columns.get(name).ok_or_else(|| Error::ColumnNotFound {
                column: name.clone(),
                context: "in-memory source".into(),
            })?;
            columns.insert(name.clone(), Arc::clone(col));
        }
        Ok(LoadedColumns { n_rows: self.n_rows, columns })
    }
}

#[derive(Debug)]
enum Op {
    Define { name: String, expr: CompiledExpr },
    Filter { label: String, expr: CompiledExpr },
}

/// Number of rows surviving one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutFlowEntry {
    /// Filter label.
    pub label: String,
    /// Rows passing this and all previous filters.
    pub passed: usize,
}

/// An immutable view over an event source with recorded definitions and
/// filters. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct EventFrame {
    source: Arc<dyn ColumnSource>,
    ops: Vec<Arc<Op>>,
}

struct Evaluated {
    n_rows: usize,
    mask: Vec<bool>,
    columns: HashMap<String, Arc<Vec<f64>>>,
    cut_flow: Vec<CutFlowEntry>,
}

impl EventFrame {
    /// Frame over an arbitrary column source.
    pub fn new(source: Arc<dyn ColumnSource>) -> Self {
        Self { source, ops: Vec::new() }
    }

    /// Frame over in-memory columns.
    pub fn from_columns(columns: impl IntoIterator<Item = (String, Vec<f64>)>) -> Result<Self> {
        Ok(Self::new(Arc::new(MemorySource::new(columns)?)))
    }

    /// Frame over a set of Parquet files holding the table `tree`.
    ///
    /// Fails with [`Error::Data`] when `files` is empty.
    pub fn open(files: &[PathBuf], tree: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(ParquetSource::open(files, tree)?)))
    }

    /// `true` if `name` is a source column or an earlier definition.
    pub fn has_column(&self, name: &str) -> bool {
        self.source.column_names().iter().any(|c| c == name)
            || self.ops.iter().any(|op| matches!(op.as_ref(), Op::Define { name: n, .. } if n == name))
    }

    /// Source columns followed by defined columns.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.source.column_names().to_vec();
        for op in &self.ops {
            if let Op::Define { name, .. } = op.as_ref() {
                names.push(name.clone());
            }
        }
        names
    }

    /// Labels of the recorded filters, in application order.
    pub fn filter_labels(&self) -> Vec<&str> {
        self.ops
            .iter()
            .filter_map(|op| match op.as_ref() {
                Op::Filter { label, .. } => Some(label.as_str()),
                Op::Define { .. } => None,
            })
            .collect()
    }

    fn check_columns(&self, expr: &CompiledExpr, context: impl Fn() -> String) -> Result<()> {
        for col in &expr.required_columns {
            if !self.has_column(col) {
                return Err(Error::ColumnNotFound { column: col.clone(), context: context() });
            }
        }
        Ok(())
    }

    /// Return a new frame with column `name` defined by `expression`.
    pub fn define(&self, name: &str, expression: &str) -> Result<Self> {
        if self.has_column(name) {
            return Err(Error::Validation(format!("column '{}' is already defined", name)));
        }
        let expr = CompiledExpr::compile(expression)?;
        self.check_columns(&expr, || format!("definition of '{}'", name))?;
        let mut ops = self.ops.clone();
        ops.push(Arc::new(Op::Define { name: name.to_string(), expr }));
        Ok(Self { source: Arc::clone(&self.source), ops })
    }

    /// Return a new frame keeping only rows where `predicate` is `> 0`.
    pub fn filter(&self, predicate: &str, label: &str) -> Result<Self> {
        let expr = CompiledExpr::compile(predicate)?;
        self.check_columns(&expr, || format!("filter '{}'", label))?;
        let mut ops = self.ops.clone();
        ops.push(Arc::new(Op::Filter { label: label.to_string(), expr }));
        Ok(Self { source: Arc::clone(&self.source), ops })
    }

    /// Materialize the selected rows of the given columns.
    pub fn as_arrays(&self, columns: &[&str]) -> Result<HashMap<String, Vec<f64>>> {
        let wanted: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let ev = self.evaluate(&wanted)?;
        let mut out = HashMap::with_capacity(wanted.len());
        for name in wanted {
            let col = &ev.columns[&name];
            let selected: Vec<f64> =
                col.iter().zip(&ev.mask).filter(|(_, keep)| **keep).map(|(v, _)| *v).collect();
            out.insert(name, selected);
        }
        Ok(out)
    }

    /// Number of selected rows.
    pub fn count(&self) -> Result<usize> {
        let ev = self.evaluate(&[])?;
        Ok(ev.mask.iter().filter(|keep| **keep).count())
    }

    /// Rows surviving each filter, in application order, preceded by the
    /// total row count (label `"all"`).
    pub fn cut_flow(&self) -> Result<Vec<CutFlowEntry>> {
        let ev = self.evaluate(&[])?;
        let mut flow = vec![CutFlowEntry { label: "all".into(), passed: ev.n_rows }];
        flow.extend(ev.cut_flow);
        Ok(flow)
    }

    fn evaluate(&self, wanted: &[String]) -> Result<Evaluated> {
        for col in wanted {
            if !self.has_column(col) {
                return Err(Error::ColumnNotFound {
                    column: col.clone(),
                    context: "materialization".into(),
                });
            }
        }

        // Walk backwards to find which definitions feed the request.
        let mut needed: HashSet<String> = wanted.iter().cloned().collect();
        let mut active = vec![false; self.ops.len()];
        for (i, op) in self.ops.iter().enumerate().rev() {
            match op.as_ref() {
                Op::Filter { expr, .. } => {
                    active[i] = true;
                    needed.extend(expr.required_columns.iter().cloned());
                }
                Op::Define { name, expr } => {
                    if needed.contains(name) {
                        active[i] = true;
                        needed.extend(expr.required_columns.iter().cloned());
                    }
                }
            }
        }

        let to_load: Vec<String> = self
            .source
            .column_names()
            .iter()
            .filter(|c| needed.contains(c.as_str()))
            .cloned()
            .collect();
        let LoadedColumns { n_rows, mut columns } = self.source.load(&to_load)?;

        let mut mask = vec![true; n_rows];
        let mut cut_flow = Vec::new();
        for (op, on) in self.ops.iter().zip(active) {
            if !on {
                continue;
            }
            match op.as_ref() {
                Op::Define { name, expr } => {
                    let values = eval_op(expr, &columns, n_rows);
                    columns.insert(name.clone(), Arc::new(values));
                }
                Op::Filter { label, expr } => {
                    let values = eval_op(expr, &columns, n_rows);
                    for (keep, v) in mask.iter_mut().zip(&values) {
                        *keep = *keep && *v > 0.0;
                    }
                    let passed = mask.iter().filter(|keep| **keep).count();
                    tracing::debug!(filter = %label, passed, "applied filter");
                    cut_flow.push(CutFlowEntry { label: label.clone(), passed });
                }
            }
        }

        Ok(Evaluated { n_rows, mask, columns, cut_flow })
    }
}

fn eval_op(expr: &CompiledExpr, columns: &HashMap<String, Arc<Vec<f64>>>, n_rows: usize) -> Vec<f64> {
    // Columns were validated at define/filter time and loaded by `evaluate`.
    let cols: Vec<&[f64]> =
        expr.required_columns.iter().map(|name| columns[name].as_slice()).collect();
    expr.eval_columns(&cols, n_rows)
}
