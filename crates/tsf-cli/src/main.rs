//! tsf CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tsf_analysis::present::{to_csv, to_text_table};
use tsf_analysis::{
    AnalysisContext, CountMode, CreateHistograms, EfficiencyParams, TabulateEfficiencies,
    TabulateScaleFactors, hadronic_recoil_workflow,
};
use tsf_catalog::load_analysis;
use tsf_core::VariationSet;
use tsf_pipeline::{LocalStore, STORE_ENV, Scheduler, Stage};

/// Overrides the ntuple base path of the analysis file.
const NTUPLE_BASE_ENV: &str = "TSF_NTUPLE_BASE";

#[derive(Parser)]
#[command(name = "tsf")]
#[command(about = "Trigger efficiencies and data/MC scale factors")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BuildArgs {
    /// Analysis definition (YAML)
    #[arg(long)]
    analysis: PathBuf,

    /// Config (campaign) name
    #[arg(long, default_value = "ul_2018")]
    config: String,

    /// Version tag of every stage identity
    #[arg(long, default_value = "v1")]
    version_tag: String,

    /// Artifact store root. Defaults to $TSF_LOCAL_STORE.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Threads (0 = auto).
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Confidence level of the efficiency intervals
    #[arg(long, default_value = "0.68")]
    coverage: f64,

    /// Use plain sums of weights instead of effective counts.
    #[arg(long)]
    weight_sums: bool,

    /// Output file for the build summary (pretty JSON). Defaults to stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MeasurementArgs {
    /// Channel name
    #[arg(long, default_value = "mm")]
    channel: String,

    /// Variables, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    variables: Vec<String>,

    /// Top-level processes, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    processes: Vec<String>,

    /// Reference category
    #[arg(long)]
    ref_category: String,

    /// Reference+signal category
    #[arg(long)]
    sig_category: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill the histogram of one dataset in one category
    Histograms {
        #[command(flatten)]
        build: BuildArgs,

        /// Channel name
        #[arg(long, default_value = "mm")]
        channel: String,

        /// Dataset name
        #[arg(long)]
        dataset: String,

        /// Category name
        #[arg(long)]
        category: String,

        /// Variables, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        variables: Vec<String>,
    },

    /// Efficiencies of the summed processes, with their CSV table
    Efficiencies {
        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        measurement: MeasurementArgs,
    },

    /// Data/MC scale factors, with their CSV table
    ScaleFactors {
        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        measurement: MeasurementArgs,
    },

    /// Hadronic-recoil trigger workflow of the di-muon channel
    Workflow {
        #[command(flatten)]
        build: BuildArgs,
    },

    /// Print an efficiency or scale factor archive
    Show {
        /// Archive (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Print CSV instead of the text table
        #[arg(long)]
        csv: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Histograms { build, channel, dataset, category, variables } => {
            let ctx = load_context(&build)?;
            let stage: Arc<dyn Stage> = Arc::new(CreateHistograms::new(
                &ctx,
                &build.config,
                &channel,
                &dataset,
                &category,
                &variables,
            )?);
            run_build(&build, vec![stage])
        }
        Commands::Efficiencies { build, measurement } => {
            let ctx = load_context(&build)?;
            let stage: Arc<dyn Stage> =
                Arc::new(TabulateEfficiencies::new(&ctx, measurement.params(&build.config))?);
            run_build(&build, vec![stage])
        }
        Commands::ScaleFactors { build, measurement } => {
            let ctx = load_context(&build)?;
            let stage: Arc<dyn Stage> =
                Arc::new(TabulateScaleFactors::new(&ctx, measurement.params(&build.config))?);
            run_build(&build, vec![stage])
        }
        Commands::Workflow { build } => {
            let ctx = load_context(&build)?;
            let roots = hadronic_recoil_workflow(&ctx, &build.config)?;
            run_build(&build, roots)
        }
        Commands::Show { input, csv } => cmd_show(&input, csv),
    }
}

impl MeasurementArgs {
    fn params(self, config: &str) -> EfficiencyParams {
        EfficiencyParams::new(
            config,
            &self.channel,
            self.variables,
            self.processes,
            &self.ref_category,
            &self.sig_category,
        )
    }
}

fn load_context(build: &BuildArgs) -> Result<Arc<AnalysisContext>> {
    if build.threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(build.threads).build_global();
    }

    tracing::info!(path = %build.analysis.display(), "loading analysis");
    let mut analysis = load_analysis(&build.analysis)
        .with_context(|| format!("loading {}", build.analysis.display()))?;
    if let Some(base) = std::env::var_os(NTUPLE_BASE_ENV) {
        analysis.set_ntuple_base(PathBuf::from(base));
    }
    tracing::info!(
        analysis = %analysis.name,
        ntuples = %analysis.ntuple_base().display(),
        "analysis loaded"
    );

    let mut ctx = AnalysisContext::new(Arc::new(analysis), &build.version_tag);
    ctx.efficiency.coverage = build.coverage;
    if build.weight_sums {
        ctx.efficiency.count_mode = CountMode::WeightSums;
    }
    Ok(Arc::new(ctx))
}

fn open_store(build: &BuildArgs) -> Result<LocalStore> {
    match &build.store {
        Some(root) => Ok(LocalStore::new(root)),
        None => LocalStore::from_env()
            .with_context(|| format!("pass --store or set {}", STORE_ENV)),
    }
}

fn run_build(build: &BuildArgs, roots: Vec<Arc<dyn Stage>>) -> Result<()> {
    let scheduler = Scheduler::new(open_store(build)?);
    let summary = scheduler.build(&roots)?;
    tracing::info!(
        executed = summary.executed.len(),
        cached = summary.cached.len(),
        "build complete"
    );

    let artifacts: Vec<String> = roots
        .iter()
        .map(|s| scheduler.store().target(s.id()).path().display().to_string())
        .collect();
    let output_json = serde_json::json!({
        "executed": summary.executed,
        "cached": summary.cached,
        "artifacts": artifacts,
    });
    write_json(build.output.as_ref(), output_json)
}

fn cmd_show(input: &Path, csv: bool) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let set: VariationSet = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not an efficiency or scale factor archive", input.display()))?;
    if csv {
        print!("{}", to_csv(&set));
    } else {
        print!("{}", to_text_table(&set));
    }
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
