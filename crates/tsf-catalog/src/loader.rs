//! Analysis YAML and sample database loading.
//!
//! The analysis file lists configs with their campaign, variables, top-level
//! processes, datasets, channels and categories. Dataset bookkeeping (event
//! and file counts, cross sections, generator weights) comes from a separate
//! sample database keyed by dataset name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tsf_core::{Error, Result};

use crate::config::{Analysis, Config};
use crate::objects::{Campaign, Category, Channel, ChannelSelection, Dataset, Predicate, Variable};
use crate::process::{Process, ProcessTree};

/// Keyword selecting nothing in a channel's `selection`.
const NOT_IMPLEMENTED: &str = "not_implemented";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalysisSpec {
    name: String,
    ntuple_tree: String,
    ntuple_base_path: PathBuf,
    sample_database: PathBuf,
    configs: Vec<ConfigSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigSpec {
    campaign: CampaignSpec,
    #[serde(default)]
    variables: Vec<VariableSpec>,
    #[serde(default)]
    processes: Vec<ProcessSpec>,
    #[serde(default)]
    datasets: Vec<DatasetSpec>,
    #[serde(default)]
    channels: Vec<ChannelSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CampaignSpec {
    name: String,
    id: u32,
    year: u32,
    lumi: f64,
    #[serde(default = "default_ecm")]
    ecm: f64,
}

fn default_ecm() -> f64 {
    13.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariableSpec {
    name: String,
    id: u32,
    #[serde(default)]
    expression: Option<String>,
    binning: Vec<f64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessSpec {
    name: String,
    id: u32,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    is_data: bool,
    #[serde(default)]
    processes: Vec<ProcessSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetSpec {
    name: String,
    id: u32,
    /// Existing process the dataset-level process is attached to.
    parent: String,
    /// Name of the dataset-level process.
    process: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PredicateSpec {
    name: String,
    expression: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SelectionSpec {
    Predicates(Vec<PredicateSpec>),
    Keyword(String),
}

impl Default for SelectionSpec {
    fn default() -> Self {
        SelectionSpec::Predicates(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChannelSpec {
    name: String,
    id: u32,
    #[serde(default)]
    selection: SelectionSpec,
    #[serde(default)]
    categories: Vec<CategorySpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategorySpec {
    name: String,
    id: u32,
    #[serde(default)]
    variables: Vec<String>,
    #[serde(default)]
    selection: Option<PredicateSpec>,
}

/// One sample database entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SampleEntry {
    /// Source location key.
    pub dbs: String,
    /// Number of files.
    pub nfiles: u64,
    /// Number of generated events.
    pub nevents: u64,
    /// Cross section in pb (simulation only).
    #[serde(default)]
    pub xsec: Option<f64>,
    /// Negative-weight normalization fraction (simulation only).
    #[serde(default)]
    pub generator_weight: Option<f64>,
}

fn config_err(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Config(format!("{}: {}", path.display(), e))
}

/// Read a sample database. The format follows the file suffix: `.json`, or
/// `.yaml`/`.yml`.
pub fn read_sample_database(path: &Path) -> Result<HashMap<String, SampleEntry>> {
    let bytes = std::fs::read(path).map_err(|e| config_err(path, e))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_slice(&bytes).map_err(|e| config_err(path, e)),
        Some("yaml" | "yml") => serde_yaml_ng::from_slice(&bytes).map_err(|e| config_err(path, e)),
        _ => Err(config_err(path, "sample database must be .json, .yaml or .yml")),
    }
}

/// Load an analysis YAML file. Relative paths inside it resolve against the
/// file's directory.
pub fn load_analysis(path: &Path) -> Result<Analysis> {
    let bytes = std::fs::read(path).map_err(|e| config_err(path, e))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let analysis = parse_analysis(&bytes, base_dir).map_err(|e| match e {
        Error::Config(msg) => config_err(path, msg),
        other => other,
    })?;
    tracing::debug!(
        analysis = %analysis.name,
        configs = ?analysis.config_names(),
        path = %path.display(),
        "loaded analysis"
    );
    Ok(analysis)
}

/// Parse analysis YAML; `base_dir` anchors relative paths.
pub fn parse_analysis(yaml: &[u8], base_dir: &Path) -> Result<Analysis> {
    let spec: AnalysisSpec =
        serde_yaml_ng::from_slice(yaml).map_err(|e| Error::Config(e.to_string()))?;

    let db_path = base_dir.join(&spec.sample_database);
    let samples = read_sample_database(&db_path)?;

    let configs = spec
        .configs
        .iter()
        .map(|c| compile_config(c, &samples))
        .collect::<Result<Vec<_>>>()?;

    Analysis::new(&spec.name, &spec.ntuple_tree, base_dir.join(&spec.ntuple_base_path), configs)
}

fn add_processes(
    tree: &mut ProcessTree,
    specs: &[ProcessSpec],
    parent: Option<crate::ProcessId>,
) -> Result<()> {
    for spec in specs {
        let label = spec.label.clone().unwrap_or_else(|| spec.name.clone());
        let id = tree.add(Process::new(&spec.name, spec.id, &label, spec.is_data), parent)?;
        add_processes(tree, &spec.processes, Some(id))?;
    }
    Ok(())
}

fn predicate(spec: &PredicateSpec) -> Predicate {
    Predicate { name: spec.name.clone(), expression: spec.expression.clone() }
}

fn compile_config(spec: &ConfigSpec, samples: &HashMap<String, SampleEntry>) -> Result<Config> {
    let c = &spec.campaign;
    let campaign =
        Campaign { name: c.name.clone(), id: c.id, year: c.year, lumi: c.lumi, ecm: c.ecm };

    let mut processes = ProcessTree::new();
    add_processes(&mut processes, &spec.processes, None)?;

    let mut datasets = Vec::with_capacity(spec.datasets.len());
    for d in &spec.datasets {
        let entry = samples.get(&d.name).ok_or_else(|| {
            Error::Config(format!("dataset '{}' is missing from the sample database", d.name))
        })?;
        let parent_id = processes.find(&d.parent).ok_or_else(|| {
            Error::Config(format!("dataset '{}': unknown parent process '{}'", d.name, d.parent))
        })?;
        let parent = processes.get(parent_id);
        let mut process =
            Process::new(&d.process, parent.id + d.id, &d.process, parent.is_data);
        if !process.is_data {
            if entry.nevents == 0 {
                return Err(Error::Config(format!(
                    "dataset '{}': simulated samples need a positive event count",
                    d.name
                )));
            }
            if let Some(xsec) = entry.xsec {
                process.xsecs.push((campaign.ecm, xsec));
            }
            process.generator_weight = entry.generator_weight;
        }
        let process = processes.add(process, Some(parent_id))?;
        datasets.push(Dataset {
            name: d.name.clone(),
            id: d.id,
            process,
            keys: vec![entry.dbs.clone()],
            n_files: entry.nfiles,
            n_events: entry.nevents,
        });
    }

    let variables = spec
        .variables
        .iter()
        .map(|v| {
            if v.binning.len() < 2 || v.binning.windows(2).any(|w| w[1] <= w[0]) {
                return Err(Error::Config(format!(
                    "variable '{}': binning must have at least two increasing edges",
                    v.name
                )));
            }
            Ok(Variable {
                name: v.name.clone(),
                id: v.id,
                expression: v.expression.clone().unwrap_or_else(|| v.name.clone()),
                bin_edges: v.binning.clone(),
                title: v.title.clone().unwrap_or_else(|| v.name.clone()),
                unit: v.unit.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut channels = Vec::with_capacity(spec.channels.len());
    let mut categories = Vec::new();
    for ch in &spec.channels {
        let selection = match &ch.selection {
            SelectionSpec::Predicates(list) => {
                ChannelSelection::Predicates(list.iter().map(predicate).collect())
            }
            SelectionSpec::Keyword(k) if k == NOT_IMPLEMENTED => ChannelSelection::NotImplemented,
            SelectionSpec::Keyword(k) => {
                return Err(Error::Config(format!(
                    "channel '{}': unknown selection keyword '{}' (expected '{}' or a list)",
                    ch.name, k, NOT_IMPLEMENTED
                )));
            }
        };
        for cat in &ch.categories {
            categories.push(Category {
                name: cat.name.clone(),
                id: cat.id,
                channel: ch.name.clone(),
                variables: cat.variables.clone(),
                selection: cat.selection.as_ref().map(predicate),
            });
        }
        channels.push(Channel {
            name: ch.name.clone(),
            id: ch.id,
            selection,
            categories: ch.categories.iter().map(|c| c.name.clone()).collect(),
        });
    }

    Config::new(campaign, processes, datasets, variables, channels, categories)
}
