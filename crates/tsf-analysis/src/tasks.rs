//! Pipeline stages of the trigger study.
//!
//! Stage identities follow `<kind>/<config>/<parameters...>/<version>/<artifact>`:
//!
//! | stage                   | parameters                                           |
//! |-------------------------|------------------------------------------------------|
//! | `CreateHistograms`      | channel, dataset, category, variables                |
//! | `CalculateEfficiencies` | channel, `ref__sig` categories, variables, processes |
//! | `CalculateScaleFactors` | as above                                             |
//! | `TabulateEfficiencies`  | as above                                             |
//! | `TabulateScaleFactors`  | as above                                             |
//!
//! List-valued parameters are joined with `__`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tsf_catalog::{Analysis, Config};
use tsf_core::{Error, Result, VariationSet};
use tsf_events::EventFrame;
use tsf_hist::{Axis, FillCoord, WeightedHistogram, sum_histograms};
use tsf_pipeline::{Inputs, Stage, StageId};

use crate::efficiency::{EfficiencyOptions, compute_efficiency};
use crate::present::to_csv;
use crate::scalefactor::combine_scale_factors;
use crate::selection::{SelectionContext, TOTAL_WEIGHT, apply_selection};

const HISTOGRAM_ARTIFACT: &str = "histogram.json";
const EFFICIENCY_ARTIFACT: &str = "efficiencies.json";
const SCALE_FACTOR_ARTIFACT: &str = "scalefactors.json";
const EFFICIENCY_TABLE: &str = "efficiencies.csv";
const SCALE_FACTOR_TABLE: &str = "scalefactors.csv";

/// Category axis name of the stage histograms.
pub const CATEGORY_AXIS: &str = "category";
/// Process axis name of the stage histograms.
pub const PROCESS_AXIS: &str = "process";

fn take_column(
    arrays: &mut HashMap<String, Vec<f64>>,
    column: &str,
    stage: &StageId,
) -> Result<Vec<f64>> {
    arrays.remove(column).ok_or_else(|| Error::ColumnNotFound {
        column: column.to_string(),
        context: format!("stage {}", stage),
    })
}

fn join_names(names: &[String]) -> String {
    names.join("__")
}

/// Settings shared by all stages of one build.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    /// Loaded catalog.
    pub analysis: Arc<Analysis>,
    /// Version tag in every stage identity.
    pub version: String,
    /// Efficiency estimator settings.
    pub efficiency: EfficiencyOptions,
}

impl AnalysisContext {
    /// Context with default efficiency settings.
    pub fn new(analysis: Arc<Analysis>, version: &str) -> Self {
        Self { analysis, version: version.to_string(), efficiency: EfficiencyOptions::default() }
    }
}

/// Selected, weighted histogram of one dataset in one category.
///
/// Axes: `category` (all categories of the config), `process` (all top-level
/// processes), then one binned axis per variable. Rows are filled at the
/// dataset's top-level process.
pub struct CreateHistograms {
    ctx: Arc<AnalysisContext>,
    config: Arc<Config>,
    channel: String,
    dataset: String,
    category: String,
    variables: Vec<String>,
    id: StageId,
}

impl CreateHistograms {
    /// Check the names against the catalog and build the identity.
    pub fn new(
        ctx: &Arc<AnalysisContext>,
        config: &str,
        channel: &str,
        dataset: &str,
        category: &str,
        variables: &[String],
    ) -> Result<Self> {
        let cfg = ctx.analysis.get_config(config)?;
        cfg.get_channel(channel)?;
        cfg.get_dataset(dataset)?;
        cfg.get_category(category)?;
        if variables.is_empty() {
            return Err(Error::Config("at least one variable is required".into()));
        }
        for v in variables {
            cfg.get_variable(v)?;
        }
        let id = StageId::new("CreateHistograms", &ctx.version, config, HISTOGRAM_ARTIFACT)?
            .with_part(channel)?
            .with_part(dataset)?
            .with_part(category)?
            .with_part(join_names(variables))?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            config: cfg,
            channel: channel.to_string(),
            dataset: dataset.to_string(),
            category: category.to_string(),
            variables: variables.to_vec(),
            id,
        })
    }

    /// Ntuple files of the dataset in this channel, sorted by path.
    pub fn ntuple_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.ctx.analysis.ntuple_dir(&self.config, &self.dataset, &self.channel);
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            Error::Data(format!("cannot list ntuples in {}: {}", dir.display(), e))
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "parquet") {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(Error::Data(format!("no .parquet files in {}", dir.display())));
        }
        Ok(files)
    }
}

impl Stage for CreateHistograms {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn run(&self, _inputs: &Inputs) -> Result<Vec<u8>> {
        let cfg = &self.config;
        let channel = cfg.get_channel(&self.channel)?;
        let category = cfg.get_category(&self.category)?;
        let dataset = cfg.get_dataset(&self.dataset)?;
        let process = cfg.dataset_process(dataset);

        let files = self.ntuple_files()?;
        tracing::debug!(stage = %self.id, files = files.len(), "reading ntuples");
        let events = EventFrame::open(&files, &self.ctx.analysis.ntuple_tree)?;

        let sel = SelectionContext { campaign: &cfg.campaign, channel, category, process, dataset };
        let mut events = apply_selection(&sel, events)?;

        let mut variables = Vec::with_capacity(self.variables.len());
        let mut columns = Vec::with_capacity(self.variables.len());
        for name in &self.variables {
            let var = cfg.get_variable(name)?;
            if events.has_column(&var.expression) {
                columns.push(var.expression.clone());
            } else {
                let column = format!("variable_{}", var.name);
                events = events.define(&column, &var.expression)?;
                columns.push(column);
            }
            variables.push(var);
        }

        // The cut flow costs a full pass over the ntuples.
        if tracing::enabled!(tracing::Level::DEBUG) {
            for entry in events.cut_flow()? {
                tracing::debug!(stage = %self.id, filter = %entry.label, passed = entry.passed, "cut flow");
            }
        }

        let mut wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
        wanted.push(TOTAL_WEIGHT);
        let mut arrays = events.as_arrays(&wanted)?;
        let weights = take_column(&mut arrays, TOTAL_WEIGHT, &self.id)?;

        let mut axes = vec![
            Axis::category(CATEGORY_AXIS, cfg.category_names())?,
            Axis::category(PROCESS_AXIS, cfg.process_names())?,
        ];
        for var in &variables {
            axes.push(Axis::variable(&var.name, &var.full_title(), var.bin_edges.clone())?);
        }
        let mut hist = WeightedHistogram::new(axes)?;

        let root = cfg.processes.get(cfg.processes.root_process(dataset.process));
        let mut coords = vec![FillCoord::Label(&category.name), FillCoord::Label(&root.name)];
        for column in &columns {
            let values = arrays.get(column).ok_or_else(|| Error::ColumnNotFound {
                column: column.clone(),
                context: format!("stage {}", self.id),
            })?;
            coords.push(FillCoord::Values(values));
        }
        hist.fill(&coords, &weights)?;

        tracing::info!(
            stage = %self.id,
            dataset = %dataset.name,
            process = %root.name,
            entries = hist.entries(),
            "histogram filled"
        );
        hist.to_json()
    }
}

/// Parameters of an efficiency measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfficiencyParams {
    /// Config name.
    pub config: String,
    /// Channel name.
    pub channel: String,
    /// Variables, outermost axis first.
    pub variables: Vec<String>,
    /// Top-level processes whose histograms are summed; kept sorted.
    pub processes: Vec<String>,
    /// Reference category.
    pub ref_category: String,
    /// Reference+signal category; a subset of the reference selection.
    pub sig_ref_category: String,
}

impl EfficiencyParams {
    /// Parameters with the process list sorted and deduplicated.
    pub fn new(
        config: &str,
        channel: &str,
        variables: Vec<String>,
        processes: Vec<String>,
        ref_category: &str,
        sig_ref_category: &str,
    ) -> Self {
        let mut params = Self {
            config: config.to_string(),
            channel: channel.to_string(),
            variables,
            processes: Vec::new(),
            ref_category: ref_category.to_string(),
            sig_ref_category: sig_ref_category.to_string(),
        };
        params.set_processes(processes);
        params
    }

    fn set_processes(&mut self, mut processes: Vec<String>) {
        processes.sort();
        processes.dedup();
        self.processes = processes;
    }

    /// Same measurement for another process list.
    pub fn with_processes(&self, processes: Vec<String>) -> Self {
        let mut params = self.clone();
        params.set_processes(processes);
        params
    }

    /// Split the process list into its data and simulated parts.
    pub fn split_by_kind(&self, cfg: &Config) -> Result<(Self, Self)> {
        let mut data = Vec::new();
        let mut mc = Vec::new();
        for name in &self.processes {
            let (_, p) = cfg.get_process(name)?;
            if p.is_data { data.push(name.clone()) } else { mc.push(name.clone()) }
        }
        if data.is_empty() || mc.is_empty() {
            return Err(Error::Config(format!(
                "scale factors need data and simulated processes, got {:?}",
                self.processes
            )));
        }
        Ok((self.with_processes(data), self.with_processes(mc)))
    }

    fn validate(&self, cfg: &Config) -> Result<()> {
        cfg.get_channel(&self.channel)?;
        cfg.get_category(&self.ref_category)?;
        cfg.get_category(&self.sig_ref_category)?;
        if self.variables.is_empty() {
            return Err(Error::Config("at least one variable is required".into()));
        }
        for v in &self.variables {
            cfg.get_variable(v)?;
        }
        if self.processes.is_empty() {
            return Err(Error::Config("at least one process is required".into()));
        }
        for p in &self.processes {
            cfg.get_process(p)?;
        }
        Ok(())
    }

    fn stage_id(&self, ctx: &AnalysisContext, kind: &str, artifact: &str) -> Result<StageId> {
        self.stage_id_with(&ctx.version, &ctx.efficiency, kind, artifact)
    }

    /// The estimator settings shape every artifact downstream of the
    /// histograms, so they are part of the identity.
    fn stage_id_with(
        &self,
        version: &str,
        options: &EfficiencyOptions,
        kind: &str,
        artifact: &str,
    ) -> Result<StageId> {
        StageId::new(kind, version, &self.config, artifact)?
            .with_part(&self.channel)?
            .with_part(format!("{}__{}", self.ref_category, self.sig_ref_category))?
            .with_part(join_names(&self.variables))?
            .with_part(join_names(&self.processes))?
            .with_part(options.tag())
    }
}

fn resolve(ctx: &Arc<AnalysisContext>, params: &EfficiencyParams) -> Result<Arc<Config>> {
    let cfg = ctx.analysis.get_config(&params.config)?;
    params.validate(&cfg)?;
    Ok(cfg)
}

/// Efficiency of the reference+signal category relative to the reference
/// category, summed over the requested processes.
pub struct CalculateEfficiencies {
    ctx: Arc<AnalysisContext>,
    config: Arc<Config>,
    params: EfficiencyParams,
    id: StageId,
}

impl CalculateEfficiencies {
    /// Check the parameters against the catalog and build the identity.
    pub fn new(ctx: &Arc<AnalysisContext>, params: EfficiencyParams) -> Result<Self> {
        let config = resolve(ctx, &params)?;
        let id = params.stage_id(ctx, "CalculateEfficiencies", EFFICIENCY_ARTIFACT)?;
        Ok(Self { ctx: Arc::clone(ctx), config, params, id })
    }

    /// Parameters of this measurement.
    pub fn params(&self) -> &EfficiencyParams {
        &self.params
    }
}

impl Stage for CalculateEfficiencies {
    fn id(&self) -> &StageId {
        &self.id
    }

    /// One histogram per matching dataset and category. A dataset matches when
    /// its process is one of the requested processes or descends from one.
    fn requires(&self) -> Result<Vec<Arc<dyn Stage>>> {
        let cfg = &self.config;
        let mut wanted = Vec::with_capacity(self.params.processes.len());
        for name in &self.params.processes {
            wanted.push(cfg.get_process(name)?.0);
        }

        let mut reqs: Vec<Arc<dyn Stage>> = Vec::new();
        for dataset in cfg.datasets() {
            if !wanted.iter().any(|&p| cfg.processes.is_or_descends_from(dataset.process, p)) {
                continue;
            }
            for category in [&self.params.ref_category, &self.params.sig_ref_category] {
                reqs.push(Arc::new(CreateHistograms::new(
                    &self.ctx,
                    cfg.name(),
                    &self.params.channel,
                    &dataset.name,
                    category,
                    &self.params.variables,
                )?));
            }
        }
        if reqs.is_empty() {
            return Err(Error::Data(format!(
                "no datasets belong to processes {:?}",
                self.params.processes
            )));
        }
        Ok(reqs)
    }

    fn run(&self, inputs: &Inputs) -> Result<Vec<u8>> {
        let hists = inputs
            .targets()
            .iter()
            .map(|t| WeightedHistogram::from_json(&t.read()?))
            .collect::<Result<Vec<_>>>()?;
        let total = sum_histograms(&hists)?;

        let processes: Vec<&str> = self.params.processes.iter().map(String::as_str).collect();
        let project = |category: &str| -> Result<WeightedHistogram> {
            total
                .select(CATEGORY_AXIS, &[category])?
                .sum_axis(CATEGORY_AXIS)?
                .select(PROCESS_AXIS, &processes)?
                .sum_axis(PROCESS_AXIS)
        };
        let reference = project(&self.params.ref_category)?;
        let signal = project(&self.params.sig_ref_category)?;

        let eff = compute_efficiency(&reference, &signal, &self.ctx.efficiency)?;
        tracing::info!(
            stage = %self.id,
            histograms = hists.len(),
            bins = eff.nominal.len(),
            "efficiencies computed"
        );
        Ok(serde_json::to_vec_pretty(&eff)?)
    }
}

/// Data/simulation ratio of the efficiencies of the data and simulated
/// processes in the parameter list.
pub struct CalculateScaleFactors {
    ctx: Arc<AnalysisContext>,
    data: EfficiencyParams,
    mc: EfficiencyParams,
    id: StageId,
}

impl CalculateScaleFactors {
    /// The process list must contain at least one data and one simulated
    /// process.
    pub fn new(ctx: &Arc<AnalysisContext>, params: EfficiencyParams) -> Result<Self> {
        let config = resolve(ctx, &params)?;
        let (data, mc) = params.split_by_kind(&config)?;
        let id = params.stage_id(ctx, "CalculateScaleFactors", SCALE_FACTOR_ARTIFACT)?;
        Ok(Self { ctx: Arc::clone(ctx), data, mc, id })
    }
}

impl Stage for CalculateScaleFactors {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn requires(&self) -> Result<Vec<Arc<dyn Stage>>> {
        Ok(vec![
            Arc::new(CalculateEfficiencies::new(&self.ctx, self.data.clone())?),
            Arc::new(CalculateEfficiencies::new(&self.ctx, self.mc.clone())?),
        ])
    }

    fn run(&self, inputs: &Inputs) -> Result<Vec<u8>> {
        let data: VariationSet = inputs.get(0)?.load_json()?;
        let mc: VariationSet = inputs.get(1)?.load_json()?;
        let sf = combine_scale_factors(&data, &mc)?;
        let undefined = sf.nominal.as_slice().iter().filter(|v| v.is_nan()).count();
        tracing::info!(stage = %self.id, bins = sf.nominal.len(), undefined, "scale factors computed");
        Ok(serde_json::to_vec_pretty(&sf)?)
    }
}

fn tabulate(inputs: &Inputs) -> Result<Vec<u8>> {
    let set: VariationSet = inputs.get(0)?.load_json()?;
    Ok(to_csv(&set).into_bytes())
}

/// CSV table of an efficiency archive.
pub struct TabulateEfficiencies {
    upstream: Arc<dyn Stage>,
    id: StageId,
}

impl TabulateEfficiencies {
    /// Table of [`CalculateEfficiencies`] with the same parameters.
    pub fn new(ctx: &Arc<AnalysisContext>, params: EfficiencyParams) -> Result<Self> {
        let id = params.stage_id(ctx, "TabulateEfficiencies", EFFICIENCY_TABLE)?;
        let upstream = Arc::new(CalculateEfficiencies::new(ctx, params)?);
        Ok(Self { upstream, id })
    }
}

impl Stage for TabulateEfficiencies {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn requires(&self) -> Result<Vec<Arc<dyn Stage>>> {
        Ok(vec![Arc::clone(&self.upstream)])
    }

    fn run(&self, inputs: &Inputs) -> Result<Vec<u8>> {
        tabulate(inputs)
    }
}

/// CSV table of a scale factor archive.
pub struct TabulateScaleFactors {
    upstream: Arc<dyn Stage>,
    id: StageId,
}

impl TabulateScaleFactors {
    /// Table of [`CalculateScaleFactors`] with the same parameters.
    pub fn new(ctx: &Arc<AnalysisContext>, params: EfficiencyParams) -> Result<Self> {
        let id = params.stage_id(ctx, "TabulateScaleFactors", SCALE_FACTOR_TABLE)?;
        let upstream = Arc::new(CalculateScaleFactors::new(ctx, params)?);
        Ok(Self { upstream, id })
    }
}

impl Stage for TabulateScaleFactors {
    fn id(&self) -> &StageId {
        &self.id
    }

    fn requires(&self) -> Result<Vec<Arc<dyn Stage>>> {
        Ok(vec![Arc::clone(&self.upstream)])
    }

    fn run(&self, inputs: &Inputs) -> Result<Vec<u8>> {
        tabulate(inputs)
    }
}

/// Hadronic-recoil trigger measurement in the di-muon channel: tables of the
/// simulated and data efficiencies and of the scale factors, for `met` and
/// `ht` with `mm_incl` as reference and `sig_pfht_trigger` as signal.
pub fn hadronic_recoil_workflow(
    ctx: &Arc<AnalysisContext>,
    config: &str,
) -> Result<Vec<Arc<dyn Stage>>> {
    let params = EfficiencyParams::new(
        config,
        "mm",
        vec!["met".into(), "ht".into()],
        vec!["data".into(), "dyjets".into(), "ttbar".into()],
        "mm_incl",
        "sig_pfht_trigger",
    );
    let cfg = ctx.analysis.get_config(config)?;
    let (data, mc) = params.split_by_kind(&cfg)?;
    Ok(vec![
        Arc::new(TabulateEfficiencies::new(ctx, mc)?),
        Arc::new(TabulateEfficiencies::new(ctx, data)?),
        Arc::new(TabulateScaleFactors::new(ctx, params)?),
    ])
}
