mod common;

use std::fs;

use assert_matches::assert_matches;

use gp2qc::domain::ManifestId;
use gp2qc::error::QcError;
use gp2qc::intake::{StageOutcome, prepare_submission, stage_finalized};
use gp2qc::prompt::FixedDecider;
use gp2qc::table::Table;

use common::{manifest, temp_root};

fn m(n: u32) -> ManifestId {
    ManifestId::new(n).unwrap()
}

#[test]
fn v3_submission_gets_stamped() {
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "")]);

    let prepared = prepare_submission("uploads/ABC_selfQCV3_2024.xlsx", m(2), table).unwrap();

    assert_eq!(prepared.save_name, "ABC_selfQCV3_2024_m2.csv");
    let row = prepared.table.row(0).unwrap();
    assert_eq!(row.get("manifest_id"), Some("m2"));
    assert_eq!(row.get("filename"), Some("ABC_selfQCV3_2024_m2.csv"));
}

#[test]
fn v2_submission_must_carry_the_given_id() {
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "m1")]);

    let prepared = prepare_submission("ABC_selfQCV2_2023.xlsx", m(1), table.clone()).unwrap();
    assert_eq!(prepared.save_name, "ABC_selfQCV2_2023.csv");

    assert_matches!(
        prepare_submission("ABC_selfQCV2_2023.xlsx", m(3), table),
        Err(QcError::ManifestIdMismatch { expected, found }) if expected == "m3" && found == "m1"
    );
}

#[test]
fn unknown_naming_is_rejected() {
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "m1")]);

    assert_matches!(
        prepare_submission("ABC_manifest.csv", m(1), table),
        Err(QcError::UnsupportedFormat(_))
    );
}

#[test]
fn staging_writes_into_the_study_folder() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("ABC").as_std_path()).unwrap();
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "")]);
    let prepared = prepare_submission("ABC_selfQCV3_2024.csv", m(1), table).unwrap();

    let outcome = stage_finalized(&prepared, &root, &FixedDecider::new(false)).unwrap();

    let path = root.join("ABC/ABC_selfQCV3_2024_m1.csv");
    assert_eq!(outcome, StageOutcome::Written(path.clone()));
    let written = Table::read_path(&path).unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written.row(0).unwrap().get("manifest_id"), Some("m1"));
}

#[test]
fn existing_file_is_kept_unless_confirmed() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("ABC").as_std_path()).unwrap();
    let path = root.join("ABC/ABC_selfQCV3_2024_m1.csv");
    fs::write(path.as_std_path(), "old").unwrap();
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "")]);
    let prepared = prepare_submission("ABC_selfQCV3_2024.csv", m(1), table).unwrap();

    let declined = stage_finalized(&prepared, &root, &FixedDecider::new(false)).unwrap();
    assert_eq!(declined, StageOutcome::Skipped);
    assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "old");

    let accepted = stage_finalized(&prepared, &root, &FixedDecider::new(true)).unwrap();
    assert_eq!(accepted, StageOutcome::Written(path.clone()));
    assert_ne!(fs::read_to_string(path.as_std_path()).unwrap(), "old");
}

#[test]
fn missing_study_folder() {
    let (_temp, root) = temp_root();
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "")]);
    let prepared = prepare_submission("ABC_selfQCV3_2024.csv", m(1), table).unwrap();

    assert_matches!(
        stage_finalized(&prepared, &root, &FixedDecider::new(true)),
        Err(QcError::MissingStagingDirectory(_))
    );
}

#[test]
fn filename_column_must_match_save_name() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("ABC").as_std_path()).unwrap();
    let table = manifest(&[("001", "C1", "ABC_000001", "s1", "")]);
    let mut prepared = prepare_submission("ABC_selfQCV3_2024.csv", m(1), table).unwrap();
    prepared.table.set_column("filename", Some("ABC_other.csv"));

    assert_matches!(
        stage_finalized(&prepared, &root, &FixedDecider::new(true)),
        Err(QcError::FilenameMismatch { expected, found })
            if expected == "ABC_selfQCV3_2024_m1.csv" && found == "ABC_other.csv"
    );
}

#[test]
fn staging_runs_validation_first() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("ABC").as_std_path()).unwrap();
    let table = manifest(&[
        ("001", "C1", "ABC_000001", "s1", ""),
        ("001", "C1", "ABC_000001", "s2", ""),
    ]);
    let prepared = prepare_submission("ABC_selfQCV3_2024.csv", m(1), table).unwrap();

    assert_matches!(
        stage_finalized(&prepared, &root, &FixedDecider::new(true)),
        Err(QcError::DuplicateSampleId { .. })
    );
    assert!(!root.join("ABC/ABC_selfQCV3_2024_m1.csv").exists());
}
