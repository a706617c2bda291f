use std::path::Path;
use std::sync::Arc;

use approx::assert_relative_eq;
use tsf_analysis::{
    AnalysisContext, CalculateEfficiencies, CalculateScaleFactors, CreateHistograms,
    EfficiencyOptions, EfficiencyParams, hadronic_recoil_workflow,
};
use tsf_catalog::load_analysis;
use tsf_core::{Error, VariationSet};
use tsf_events::write_parquet;
use tsf_hist::WeightedHistogram;
use tsf_pipeline::{LocalStore, Scheduler, Stage};

const ANALYSIS: &str = r#"
name: mini
ntuple_tree: ntuple
ntuple_base_path: ntuples
sample_database: datasets.json
configs:
  - campaign: {name: ul_2018, id: 1, year: 2018, lumi: 59.83}
    variables:
      - {name: met, id: 1, binning: [0, 100, 200], unit: GeV}
      - {name: ht, id: 2, expression: "ht_1 + ht_2", binning: [0, 500, 1000]}
    processes:
      - {name: data, id: 100, is_data: true}
      - {name: dyjets, id: 200}
      - {name: ttbar, id: 300}
    datasets:
      - {name: SingleMuon_A, id: 1, parent: data, process: data_a}
      - {name: DY, id: 1, parent: dyjets, process: dy_incl}
      - {name: TT, id: 1, parent: ttbar, process: tt_incl}
    channels:
      - name: mm
        id: 1
        selection:
          - {name: dimuon_selection, expression: "nmuon == 2"}
        categories:
          - {name: mm_incl, id: 101}
          - name: sig_pfht_trigger
            id: 103
            selection: {name: pfht_selection, expression: "trg == 1"}
      - name: tt
        id: 2
        selection: not_implemented
        categories:
          - {name: tt_incl, id: 204}
"#;

// Equal cross sections and event counts give DY and TT the same weight.
const DATASETS: &str = r#"{
  "SingleMuon_A": {"dbs": "/SingleMuon/A/NANOAOD", "nfiles": 1, "nevents": 7},
  "DY": {"dbs": "/DY/NANOAODSIM", "nfiles": 1, "nevents": 1000, "xsec": 100.0, "generator_weight": 1.0},
  "TT": {"dbs": "/TT/NANOAODSIM", "nfiles": 1, "nevents": 1000, "xsec": 100.0, "generator_weight": 1.0}
}"#;

fn write_ntuple(
    base: &Path,
    dataset: &str,
    channel: &str,
    met: &[f64],
    ht_1: &[f64],
    trg: &[f64],
    nmuon: &[f64],
) {
    let dir = base.join("ntuples").join("2018").join(dataset).join(channel);
    std::fs::create_dir_all(&dir).unwrap();
    let ht_2 = vec![40.0; met.len()];
    let gen_weight = vec![1.0; met.len()];
    let columns: Vec<(&str, &[f64])> = vec![
        ("met", met),
        ("ht_1", ht_1),
        ("ht_2", &ht_2[..]),
        ("trg", trg),
        ("nmuon", nmuon),
        ("genWeight", &gen_weight[..]),
    ];
    write_parquet(&dir.join("part0.parquet"), "ntuple", &columns).unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: Arc<AnalysisContext>,
    store: LocalStore,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("analysis.yaml"), ANALYSIS).unwrap();
    std::fs::write(root.join("datasets.json"), DATASETS).unwrap();

    // Data: bin (met 0, ht 0) has 2 of 4 triggered, bin (1, 1) has 1 of 2;
    // the last event fails the di-muon selection.
    write_ntuple(
        root,
        "SingleMuon_A",
        "mm",
        &[50.0, 50.0, 50.0, 50.0, 150.0, 150.0, 50.0],
        &[60.0, 60.0, 60.0, 60.0, 500.0, 500.0, 60.0],
        &[1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0],
        &[2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 1.0],
    );
    write_ntuple(root, "SingleMuon_A", "tt", &[50.0], &[60.0], &[1.0], &[2.0]);
    // Simulation: 4 of 6 equally weighted events triggered, all in bin (0, 0).
    write_ntuple(root, "DY", "mm", &[50.0; 4], &[60.0; 4], &[1.0, 1.0, 1.0, 0.0], &[2.0; 4]);
    write_ntuple(root, "TT", "mm", &[50.0; 2], &[60.0; 2], &[1.0, 0.0], &[2.0; 2]);

    let analysis = load_analysis(&root.join("analysis.yaml")).unwrap();
    let ctx = Arc::new(AnalysisContext::new(Arc::new(analysis), "v1"));
    let store = LocalStore::new(root.join("store"));
    Fixture { _dir: dir, ctx, store }
}

fn params(processes: &[&str]) -> EfficiencyParams {
    EfficiencyParams::new(
        "ul_2018",
        "mm",
        vec!["met".into(), "ht".into()],
        processes.iter().map(|p| p.to_string()).collect(),
        "mm_incl",
        "sig_pfht_trigger",
    )
}

#[test]
fn hadronic_recoil_workflow_end_to_end() {
    let fx = fixture();
    let stages = hadronic_recoil_workflow(&fx.ctx, "ul_2018").unwrap();
    let scheduler = Scheduler::new(fx.store.clone());

    let summary = scheduler.build(&stages).unwrap();
    // 3 datasets x 2 categories, 2 efficiencies, 1 ratio, 3 tables.
    assert_eq!(summary.executed.len(), 12);
    assert!(summary.cached.is_empty());

    let data_eff = CalculateEfficiencies::new(&fx.ctx, params(&["data"])).unwrap();
    let data: VariationSet = fx.store.target(data_eff.id()).load_json().unwrap();
    assert_eq!(data.nominal.shape(), &[2, 2]);
    let nominal = data.nominal.as_slice();
    assert_relative_eq!(nominal[0], 0.5, epsilon = 1e-12);
    assert!(nominal[1].is_nan() && nominal[2].is_nan());
    assert_relative_eq!(nominal[3], 0.5, epsilon = 1e-12);
    assert!(data.down.as_slice()[0] < 0.5 && data.up.as_slice()[0] > 0.5);

    let mc_eff = CalculateEfficiencies::new(&fx.ctx, params(&["ttbar", "dyjets"])).unwrap();
    let mc: VariationSet = fx.store.target(mc_eff.id()).load_json().unwrap();
    assert_relative_eq!(mc.nominal.as_slice()[0], 4.0 / 6.0, epsilon = 1e-12);

    let sf_stage = CalculateScaleFactors::new(&fx.ctx, params(&["data", "dyjets", "ttbar"])).unwrap();
    let sf: VariationSet = fx.store.target(sf_stage.id()).load_json().unwrap();
    assert_relative_eq!(sf.nominal.as_slice()[0], 0.75, epsilon = 1e-12);
    assert!(sf.nominal.as_slice()[1].is_nan());
    assert_relative_eq!(
        sf.up.as_slice()[0],
        data.up.as_slice()[0] / mc.down.as_slice()[0],
        epsilon = 1e-12
    );

    let table = fx.store.target(stages[2].id()).read().unwrap();
    let table = String::from_utf8(table).unwrap();
    let mut lines = table.lines();
    assert_eq!(lines.next(), Some("met_lo,met_hi,ht_lo,ht_hi,nominal,up,down"));
    let first: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(&first[..4], &["0", "100", "0", "500"]);
    assert_relative_eq!(first[4].parse::<f64>().unwrap(), 0.75, epsilon = 1e-12);
    assert_eq!(table.lines().count(), 5);

    let again = scheduler.build(&stages).unwrap();
    assert!(again.is_noop());
    assert_eq!(again.cached.len(), 3);
}

#[test]
fn coverage_change_recomputes_efficiencies() {
    let fx = fixture();
    let scheduler = Scheduler::new(fx.store.clone());

    let narrow: Arc<dyn Stage> =
        Arc::new(CalculateEfficiencies::new(&fx.ctx, params(&["data"])).unwrap());
    scheduler.build(&[Arc::clone(&narrow)]).unwrap();

    let wide_ctx = Arc::new(AnalysisContext {
        efficiency: EfficiencyOptions { coverage: 0.95, ..fx.ctx.efficiency },
        ..(*fx.ctx).clone()
    });
    let wide: Arc<dyn Stage> =
        Arc::new(CalculateEfficiencies::new(&wide_ctx, params(&["data"])).unwrap());
    assert_ne!(narrow.id().key(), wide.id().key());

    // Histograms are shared; only the efficiency is recomputed.
    let summary = scheduler.build(&[Arc::clone(&wide)]).unwrap();
    assert_eq!(summary.executed, [wide.id().key()]);
    assert_eq!(summary.cached.len(), 2);

    let a: VariationSet = fx.store.target(narrow.id()).load_json().unwrap();
    let b: VariationSet = fx.store.target(wide.id()).load_json().unwrap();
    assert_eq!(a.nominal.as_slice()[0], b.nominal.as_slice()[0]);
    assert!(b.down.as_slice()[0] < a.down.as_slice()[0]);
    assert!(b.up.as_slice()[0] > a.up.as_slice()[0]);
}

#[test]
fn histogram_rows_are_filled_at_the_top_level_process() {
    let fx = fixture();
    let stage: Arc<dyn Stage> = Arc::new(
        CreateHistograms::new(&fx.ctx, "ul_2018", "mm", "DY", "sig_pfht_trigger", &["met".into()])
            .unwrap(),
    );
    Scheduler::new(fx.store.clone()).build(&[Arc::clone(&stage)]).unwrap();

    let bytes = fx.store.target(stage.id()).read().unwrap();
    let hist = WeightedHistogram::from_json(&bytes).unwrap();
    assert_eq!(hist.entries(), 3);
    let dy = hist
        .select("category", &["sig_pfht_trigger"])
        .and_then(|h| h.select("process", &["dyjets"]))
        .unwrap();
    let weight = 1.0 / 1000.0 * 100.0 * 59.83 * 1000.0;
    assert_relative_eq!(dy.values(false).unwrap().as_slice()[0], 3.0 * weight, max_relative = 1e-12);
    let tt = hist.select("process", &["ttbar"]).unwrap();
    assert!(tt.values(true).unwrap().as_slice().iter().all(|&v| v == 0.0));
}

#[test]
fn not_implemented_channel_yields_an_empty_histogram() {
    let fx = fixture();
    let stage: Arc<dyn Stage> = Arc::new(
        CreateHistograms::new(&fx.ctx, "ul_2018", "tt", "SingleMuon_A", "tt_incl", &["met".into()])
            .unwrap(),
    );
    Scheduler::new(fx.store.clone()).build(&[Arc::clone(&stage)]).unwrap();

    let hist = WeightedHistogram::from_json(&fx.store.target(stage.id()).read().unwrap()).unwrap();
    assert_eq!(hist.entries(), 0);
}

#[test]
fn missing_ntuples_fail_the_stage() {
    let fx = fixture();
    let stage: Arc<dyn Stage> = Arc::new(
        CreateHistograms::new(&fx.ctx, "ul_2018", "tt", "DY", "tt_incl", &["met".into()]).unwrap(),
    );
    let err = Scheduler::new(fx.store.clone()).build(&[Arc::clone(&stage)]).unwrap_err();
    assert!(matches!(err, Error::Stage { .. }));
    assert!(matches!(err.root_cause(), Error::Data(_)));
    assert!(!fx.store.target(stage.id()).exists());
}

#[test]
fn invalid_parameters_are_rejected_up_front() {
    let fx = fixture();
    let err = CalculateEfficiencies::new(&fx.ctx, params(&["wjets"])).err().unwrap();
    assert!(matches!(err, Error::NotFound { .. }));

    let mut bad_category = params(&["data"]);
    bad_category.sig_ref_category = "sig_missing".into();
    assert!(CalculateEfficiencies::new(&fx.ctx, bad_category).is_err());

    let err = CalculateScaleFactors::new(&fx.ctx, params(&["dyjets", "ttbar"])).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}
