use std::path::PathBuf;

use tsf_core::Error;
use tsf_events::{EventFrame, write_parquet};

fn write_two_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let a = dir.join("a.parquet");
    let b = dir.join("b.parquet");
    write_parquet(
        &a,
        "Events",
        &[("nMuon", &[2.0, 1.0, 2.0][..]), ("MET_pt", &[10.0, 20.0, 30.0][..])],
    )
    .unwrap();
    write_parquet(
        &b,
        "Events",
        &[("nMuon", &[2.0, 0.0][..]), ("MET_pt", &[40.0, 50.0][..]), ("extra", &[1.0, 1.0][..])],
    )
    .unwrap();
    vec![a, b]
}

#[test]
fn reads_filters_and_defines_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_two_files(dir.path());

    let frame = EventFrame::open(&files, "Events").unwrap();
    assert!(frame.has_column("MET_pt"));
    // Only columns present in every file are visible.
    assert!(!frame.has_column("extra"));
    assert_eq!(frame.count().unwrap(), 5);

    let sel = frame
        .filter("nMuon == 2", "two_muons")
        .unwrap()
        .define("met_gev", "MET_pt / 1")
        .unwrap()
        .filter("met_gev > 15", "met")
        .unwrap();
    let cols = sel.as_arrays(&["met_gev"]).unwrap();
    assert_eq!(cols["met_gev"], vec![30.0, 40.0]);

    let flow = sel.cut_flow().unwrap();
    let passed: Vec<(String, usize)> = flow.into_iter().map(|e| (e.label, e.passed)).collect();
    assert_eq!(
        passed,
        vec![("all".to_string(), 5), ("two_muons".to_string(), 3), ("met".to_string(), 2)]
    );
}

#[test]
fn tree_name_must_match_file_tag() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_two_files(dir.path());
    let err = EventFrame::open(&files, "Friends").unwrap_err();
    assert!(matches!(err, Error::Data(_)), "{err}");
}

#[test]
fn unknown_column_in_filter_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_two_files(dir.path());
    let frame = EventFrame::open(&files, "Events").unwrap();
    match frame.filter("nElectron > 0", "ele") {
        Err(Error::ColumnNotFound { column, context }) => {
            assert_eq!(column, "nElectron");
            assert!(context.contains("ele"));
        }
        other => panic!("expected ColumnNotFound, got {other:?}"),
    }
}
