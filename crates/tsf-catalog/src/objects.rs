//! Catalog objects other than processes.

use crate::process::ProcessId;

/// A data-taking period.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    /// Campaign name, e.g. `ul_2018`.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// Data-taking year; used in ntuple paths.
    pub year: u32,
    /// Integrated luminosity in fb⁻¹.
    pub lumi: f64,
    /// Center-of-mass energy in TeV.
    pub ecm: f64,
}

/// A named boolean formula over event columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// Label reported in cut flows.
    pub name: String,
    /// Expression text (may span several lines).
    pub expression: String,
}

/// Event selection of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelection {
    /// Conjunction of the predicates, applied in order.
    Predicates(Vec<Predicate>),
    /// The channel is declared but selects nothing.
    NotImplemented,
}

/// An event-topology regime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel name, e.g. `mm`.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// Channel selection.
    pub selection: ChannelSelection,
    /// Names of the categories defined in this channel.
    pub categories: Vec<String>,
}

/// A sub-selection within a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Category name, unique within the config.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// Owning channel.
    pub channel: String,
    /// Names of the variables studied in this category.
    pub variables: Vec<String>,
    /// Optional category predicate.
    pub selection: Option<Predicate>,
}

/// A binned observable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// Column name or expression the values are taken from.
    pub expression: String,
    /// Strictly increasing bin edges.
    pub bin_edges: Vec<f64>,
    /// Axis title.
    pub title: String,
    /// Unit, if any.
    pub unit: Option<String>,
}

impl Variable {
    /// Title with unit, `"{title} ({unit})"`.
    pub fn full_title(&self) -> String {
        match &self.unit {
            Some(unit) if !unit.is_empty() => format!("{} ({})", self.title, unit),
            _ => self.title.clone(),
        }
    }
}

/// A registered sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Dataset name; also the ntuple directory name.
    pub name: String,
    /// Numeric id.
    pub id: u32,
    /// The dataset-level process.
    pub process: ProcessId,
    /// Source location keys.
    pub keys: Vec<String>,
    /// Declared number of files.
    pub n_files: u64,
    /// Declared number of generated events.
    pub n_events: u64,
}
