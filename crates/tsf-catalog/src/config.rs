//! Config (one campaign) and analysis (a set of configs).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tsf_core::{Error, Result};

use crate::objects::{Campaign, Category, Channel, Dataset, Variable};
use crate::process::{Process, ProcessId, ProcessTree};

/// All catalog objects of one campaign.
#[derive(Debug, Clone)]
pub struct Config {
    /// The campaign; its name is the config name.
    pub campaign: Campaign,
    /// Process tree.
    pub processes: ProcessTree,
    datasets: Vec<Dataset>,
    variables: Vec<Variable>,
    channels: Vec<Channel>,
    categories: Vec<Category>,
}

fn lookup<'a, T>(
    items: &'a [T],
    name: &str,
    kind: &'static str,
    key: impl Fn(&T) -> &str,
) -> Result<&'a T> {
    items
        .iter()
        .find(|item| key(item) == name)
        .ok_or_else(|| Error::NotFound { kind, name: name.to_string() })
}

impl Config {
    /// Assemble a config. Names must be unique per object kind and every
    /// cross-reference must resolve.
    pub fn new(
        campaign: Campaign,
        processes: ProcessTree,
        datasets: Vec<Dataset>,
        variables: Vec<Variable>,
        channels: Vec<Channel>,
        categories: Vec<Category>,
    ) -> Result<Self> {
        fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
            let mut seen = std::collections::HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    return Err(Error::Config(format!("duplicate {} '{}'", kind, name)));
                }
            }
            Ok(())
        }
        unique("dataset", datasets.iter().map(|d| d.name.as_str()))?;
        unique("variable", variables.iter().map(|v| v.name.as_str()))?;
        unique("channel", channels.iter().map(|c| c.name.as_str()))?;
        unique("category", categories.iter().map(|c| c.name.as_str()))?;

        let config = Self { campaign, processes, datasets, variables, channels, categories };
        for d in &config.datasets {
            if !config.processes.contains(d.process) {
                return Err(Error::Config(format!("dataset '{}' has an unknown process", d.name)));
            }
        }
        for cat in &config.categories {
            config.get_channel(&cat.channel)?;
            for v in &cat.variables {
                config.get_variable(v)?;
            }
        }
        for ch in &config.channels {
            for cat in &ch.categories {
                config.get_category(cat)?;
            }
        }
        Ok(config)
    }

    /// Config name (the campaign name).
    pub fn name(&self) -> &str {
        &self.campaign.name
    }

    /// Dataset by name.
    pub fn get_dataset(&self, name: &str) -> Result<&Dataset> {
        lookup(&self.datasets, name, "dataset", |d| d.name.as_str())
    }

    /// Process by name (any level of the tree).
    pub fn get_process(&self, name: &str) -> Result<(ProcessId, &Process)> {
        let id = self
            .processes
            .find(name)
            .ok_or_else(|| Error::NotFound { kind: "process", name: name.to_string() })?;
        Ok((id, self.processes.get(id)))
    }

    /// Channel by name.
    pub fn get_channel(&self, name: &str) -> Result<&Channel> {
        lookup(&self.channels, name, "channel", |c| c.name.as_str())
    }

    /// Category by name.
    pub fn get_category(&self, name: &str) -> Result<&Category> {
        lookup(&self.categories, name, "category", |c| c.name.as_str())
    }

    /// Variable by name.
    pub fn get_variable(&self, name: &str) -> Result<&Variable> {
        lookup(&self.variables, name, "variable", |v| v.name.as_str())
    }

    /// Datasets in registration order.
    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    /// Variables in registration order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    /// Channels in registration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Names of all categories, in registration order.
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of the top-level processes, in registration order.
    pub fn process_names(&self) -> Vec<&str> {
        self.processes.roots().map(|(_, p)| p.name.as_str()).collect()
    }

    /// The dataset-level process of `dataset`.
    pub fn dataset_process(&self, dataset: &Dataset) -> &Process {
        self.processes.get(dataset.process)
    }
}

/// A named set of configs plus ntuple location settings.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Analysis name.
    pub name: String,
    /// Table name inside the ntuple files.
    pub ntuple_tree: String,
    ntuple_base: PathBuf,
    configs: Vec<Arc<Config>>,
}

impl Analysis {
    /// Assemble an analysis; config names must be unique.
    pub fn new(
        name: &str,
        ntuple_tree: &str,
        ntuple_base: PathBuf,
        configs: Vec<Config>,
    ) -> Result<Self> {
        for (i, c) in configs.iter().enumerate() {
            if configs[..i].iter().any(|o| o.name() == c.name()) {
                return Err(Error::Config(format!("duplicate config '{}'", c.name())));
            }
        }
        Ok(Self {
            name: name.to_string(),
            ntuple_tree: ntuple_tree.to_string(),
            ntuple_base,
            configs: configs.into_iter().map(Arc::new).collect(),
        })
    }

    /// Config by name.
    pub fn get_config(&self, name: &str) -> Result<Arc<Config>> {
        self.configs
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| Error::NotFound { kind: "config", name: name.to_string() })
    }

    /// Names of all configs.
    pub fn config_names(&self) -> Vec<&str> {
        self.configs.iter().map(|c| c.name()).collect()
    }

    /// Root directory of the ntuples.
    pub fn ntuple_base(&self) -> &Path {
        &self.ntuple_base
    }

    /// Replace the ntuple root directory.
    pub fn set_ntuple_base(&mut self, base: PathBuf) {
        self.ntuple_base = base;
    }

    /// Directory holding the ntuples of `dataset` in `channel`:
    /// `<base>/<year>/<dataset>/<channel>`.
    pub fn ntuple_dir(&self, config: &Config, dataset: &str, channel: &str) -> PathBuf {
        self.ntuple_base.join(config.campaign.year.to_string()).join(dataset).join(channel)
    }
}
