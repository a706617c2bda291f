use std::path::PathBuf;

use tsf_catalog::{ChannelSelection, load_analysis};

fn shipped_config() -> PathBuf {
    // crates/tsf-catalog -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/trigger_sf.yaml")
}

#[test]
fn shipped_analysis_loads() {
    let analysis = load_analysis(&shipped_config()).unwrap();
    assert_eq!(analysis.name, "boosted_tt_trigger_sf");
    assert_eq!(analysis.ntuple_tree, "ntuple");

    let config = analysis.get_config("ul_2018").unwrap();
    assert_eq!(config.campaign.year, 2018);
    assert_eq!(config.process_names(), ["data", "dyjets", "ttbar"]);
    assert_eq!(config.datasets().len(), 13);
    assert_eq!(
        config.category_names(),
        ["mm_incl", "sig_ak8jet_trigger", "sig_pfht_trigger", "tt_incl"]
    );

    let mm = config.get_channel("mm").unwrap();
    match &mm.selection {
        ChannelSelection::Predicates(p) => assert_eq!(p.len(), 3),
        ChannelSelection::NotImplemented => panic!("mm channel must have a selection"),
    }
    assert_eq!(config.get_channel("tt").unwrap().selection, ChannelSelection::NotImplemented);

    // Every simulated dataset carries what the normalization weight needs.
    for dataset in config.datasets() {
        let process = config.dataset_process(dataset);
        if process.is_mc() {
            assert!(process.xsec(config.campaign.ecm).is_some(), "{}", dataset.name);
            assert!(process.generator_weight.is_some(), "{}", dataset.name);
        }
    }

    let (dy, _) = config.get_process("dyjets").unwrap();
    let (dy_high, p) = config.get_process("dyjets_650").unwrap();
    assert_eq!(p.id, 210);
    assert!(config.processes.has_parent_process(dy_high, dy));
    assert_eq!(config.get_variable("met").unwrap().full_title(), "p_T^miss (GeV)");
}
