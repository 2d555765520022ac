mod common;

use apdmvs::io::{parse_pairing_list, problems_from_entries, read_pairing_list};
use apdmvs::ApdError;
use common::scratch_dir;
use std::path::Path;

#[test]
fn problems_follow_list_order_and_write_under_padded_ids() {
    let text = "3\n12\n2 4 9.0 7 3.5\n4\n1 12 2.0\n7\n2 12 1.0 4 -1.0\n";
    let entries = parse_pairing_list(text, "pair.txt").unwrap();
    let problems = problems_from_entries(&entries, Path::new("dense/APD")).unwrap();

    assert_eq!(problems.len(), 3);
    assert_eq!(problems[0].index, 0);
    assert_eq!(problems[0].ref_image_id, 12);
    assert_eq!(problems[0].src_image_ids, vec![4, 7]);
    assert_eq!(problems[0].result_folder, Path::new("dense/APD/00000012"));
    assert_eq!(problems[2].src_image_ids, vec![12]);
}

#[test]
fn zero_count_list_has_no_problems() {
    let entries = parse_pairing_list("0\n", "pair.txt").unwrap();
    assert!(entries.is_empty());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = scratch_dir("pair-missing");
    let err = read_pairing_list(dir.join("pair.txt"), dir.join("APD")).unwrap_err();
    assert!(matches!(err, ApdError::Io { .. }));
    assert!(!err.is_configuration());
}

#[test]
fn bad_reference_id_reports_its_line() {
    let err = parse_pairing_list("1\n\nabc\n0\n", "pair.txt").unwrap_err();
    match err {
        ApdError::Parse { line, .. } => assert_eq!(line, 3),
        other => panic!("unexpected error {other:?}"),
    }
}

#[cfg(feature = "image-io")]
#[test]
fn empty_pairing_list_is_rejected_by_the_pipeline() {
    use apdmvs::{Pipeline, PipelineConfig};
    use std::fs;

    let dir = scratch_dir("pair-empty");
    fs::write(dir.join("pair.txt"), "0\n").unwrap();
    let pipeline = Pipeline::new(&dir, PipelineConfig::default()).unwrap();

    let err = pipeline.problems().unwrap_err();
    assert!(matches!(err, ApdError::NoProblems { .. }));
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, ApdError::NoProblems { .. }));
}
