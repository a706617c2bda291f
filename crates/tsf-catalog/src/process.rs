//! Process tree.
//!
//! Processes live in an arena; parents are referenced by index, so walking
//! to the root never needs shared ownership.

use std::collections::HashMap;

use tsf_core::{Error, Result};

/// Index of a process in its [`ProcessTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(usize);

/// A physics process.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    /// Process name, unique within the tree.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// Display label.
    pub label: String,
    /// `true` for recorded collision data.
    pub is_data: bool,
    /// Cross sections in pb, keyed by center-of-mass energy in TeV.
    pub xsecs: Vec<(f64, f64)>,
    /// Normalization fraction accounting for negative generator weights.
    pub generator_weight: Option<f64>,
    parent: Option<ProcessId>,
}

impl Process {
    /// Process without cross sections or auxiliary data.
    pub fn new(name: &str, id: u32, label: &str, is_data: bool) -> Self {
        Self {
            name: name.to_string(),
            id,
            label: label.to_string(),
            is_data,
            xsecs: Vec::new(),
            generator_weight: None,
            parent: None,
        }
    }

    /// `true` for simulated processes.
    pub fn is_mc(&self) -> bool {
        !self.is_data
    }

    /// Cross section at `ecm` TeV.
    pub fn xsec(&self, ecm: f64) -> Option<f64> {
        self.xsecs.iter().find(|(e, _)| (e - ecm).abs() < 1e-9).map(|(_, x)| *x)
    }

    /// Direct parent, if any.
    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }
}

/// Arena of processes with parent links.
#[derive(Debug, Clone, Default)]
pub struct ProcessTree {
    processes: Vec<Process>,
    by_name: HashMap<String, ProcessId>,
}

impl ProcessTree {
    /// Empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `process` below `parent` (or as a top-level process).
    pub fn add(&mut self, mut process: Process, parent: Option<ProcessId>) -> Result<ProcessId> {
        if self.by_name.contains_key(&process.name) {
            return Err(Error::Config(format!("duplicate process '{}'", process.name)));
        }
        if let Some(p) = parent
            && p.0 >= self.processes.len()
        {
            return Err(Error::Config(format!("invalid parent for process '{}'", process.name)));
        }
        process.parent = parent;
        let id = ProcessId(self.processes.len());
        self.by_name.insert(process.name.clone(), id);
        self.processes.push(process);
        Ok(id)
    }

    /// Process by index.
    ///
    /// Ids are only handed out by [`add`](Self::add), so they are always in range
    /// for the tree that created them.
    pub fn get(&self, id: ProcessId) -> &Process {
        &self.processes[id.0]
    }

    /// Index of the process called `name`.
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.by_name.get(name).copied()
    }

    /// All processes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.processes.iter().enumerate().map(|(i, p)| (ProcessId(i), p))
    }

    /// Top-level processes in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.iter().filter(|(_, p)| p.parent.is_none())
    }

    /// The top-level ancestor of `id` (itself when it has no parent).
    pub fn root_process(&self, id: ProcessId) -> ProcessId {
        let mut current = id;
        while let Some(parent) = self.get(current).parent {
            current = parent;
        }
        current
    }

    /// `true` if `ancestor` is a (possibly indirect) parent of `id`.
    pub fn has_parent_process(&self, id: ProcessId, ancestor: ProcessId) -> bool {
        let mut current = self.get(id).parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.get(p).parent;
        }
        false
    }

    /// `true` if `id` is `ancestor` or descends from it.
    pub fn is_or_descends_from(&self, id: ProcessId, ancestor: ProcessId) -> bool {
        id == ancestor || self.has_parent_process(id, ancestor)
    }

    /// `true` if `id` belongs to this tree.
    pub fn contains(&self, id: ProcessId) -> bool {
        id.0 < self.processes.len()
    }

    /// Number of processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// `true` when the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
