mod common;

use assert_matches::assert_matches;

use gp2qc::domain::{SampleTriple, StudySample};
use gp2qc::error::QcError;
use gp2qc::registry::{Registry, samples_from_table};
use gp2qc::storage::ObjectStore;
use gp2qc::table::Table;

use common::{seeded_registry, temp_root};

fn sample(study: &str, sample_id: &str, global_id: &str, clinical_id: &str) -> StudySample {
    StudySample {
        study: study.to_string(),
        triple: SampleTriple::new(sample_id, global_id, clinical_id),
    }
}

const SEED: &str = r#"{"ABC": {"001": ["ABC_000001_s1", "C1"], "002": ["ABC_000002_s1", "C2"]}}"#;

#[test]
fn added_samples_verify_clean() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);
    let batch = vec![
        sample("ABC", "003", "ABC_000003_s1", "C3"),
        sample("XYZ", "001", "XYZ_000001_s1", "X1"),
    ];

    let result = registry.add_samples(&batch).unwrap();

    assert_eq!(result.total, 4);
    assert_eq!(result.added["ABC"], 1);
    assert_eq!(result.added["XYZ"], 1);
    assert!(result.backup.starts_with("IDSTRACKER/ARCHIVE/GP2IDSMAPPER_before_add_"));
    assert!(result.backup.ends_with(".json"));
    for study in ["ABC", "XYZ"] {
        let triples = batch
            .iter()
            .filter(|s| s.study == study)
            .map(|s| s.triple.clone())
            .collect::<Vec<_>>();
        assert!(registry.verify_consistency(study, &triples).unwrap().is_empty());
    }

    let backup = registry.store().get(&result.backup).unwrap();
    assert_eq!(Registry::from_json(&backup).unwrap().len(), 2);
}

#[test]
fn conflicting_batch_leaves_store_untouched() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);
    let before = registry.store().get(&registry.location().key).unwrap();

    let err = registry
        .add_samples(&[
            sample("ABC", "004", "ABC_000004_s1", "C4"),
            sample("ABC", "005", "ABC_000001_s1", "C1"),
        ])
        .unwrap_err();

    assert_matches!(err, QcError::ConflictWithRegistry { field, values, .. } => {
        assert_eq!(field, "GP2sampleID");
        assert_eq!(values, vec!["ABC_000001_s1".to_string()]);
    });
    assert_matches!(
        registry.add_samples(&[sample("ABC", "002", "ABC_000009_s1", "C9")]),
        Err(QcError::ConflictWithRegistry { field, values, .. })
            if field == "sample_id" && values == vec!["002".to_string()]
    );
    assert_eq!(registry.store().get(&registry.location().key).unwrap(), before);
    assert!(registry.store().list("IDSTRACKER/ARCHIVE/").unwrap().is_empty());
}

#[test]
fn duplicate_sample_id_in_batch() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);

    assert_matches!(
        registry.add_samples(&[
            sample("ABC", "010", "ABC_000010_s1", "C10"),
            sample("ABC", "010", "ABC_000011_s1", "C11"),
        ]),
        Err(QcError::DuplicateKey { field, values }) if field == "study/sample_id" && values == vec!["ABC/010".to_string()]
    );
}

#[test]
fn remove_all_drops_the_study() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);

    let result = registry
        .remove_samples("ABC", &["001".to_string(), "002".to_string()])
        .unwrap();

    assert!(result.removal.study_deleted);
    assert_eq!(result.total, 0);
    assert!(result.backup.contains("GP2IDSMAPPER_before_rm_ABC_"));
    assert!(!registry.load().unwrap().contains_study("ABC"));
}

#[test]
fn remove_subset_shrinks_by_intersection() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);

    let result = registry.remove_samples("ABC", &["002".to_string()]).unwrap();

    assert_eq!(result.removal.removed, 1);
    assert!(!result.removal.study_deleted);
    let current = registry.load().unwrap();
    assert_eq!(current.study_len("ABC"), 1);
    assert!(current.get("ABC", "001").is_some());
}

#[test]
fn remove_unknown_ids_fails_without_writing() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);

    assert_matches!(
        registry.remove_samples("ABC", &["001".to_string(), "999".to_string()]),
        Err(QcError::UnknownSampleId { ids, .. }) if ids == vec!["999".to_string()]
    );
    assert_matches!(
        registry.remove_samples("NOPE", &["001".to_string()]),
        Err(QcError::UnknownStudy(study)) if study == "NOPE"
    );
    assert_eq!(registry.load().unwrap().len(), 2);
}

#[test]
fn verify_reports_changed_clinical_id() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);
    let candidates = vec![
        SampleTriple::new("001", "ABC_000001_s1", "C1"),
        SampleTriple::new("002", "ABC_000002_s1", "C9"),
    ];

    let unmatched = registry.verify_consistency("ABC", &candidates).unwrap();

    assert_eq!(unmatched, vec![candidates[1].clone()]);
}

#[test]
fn paired_studies_consistent_until_global_id_changes() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(
        &root,
        r#"{
            "PPMI-N": {"3001": ["PPMI-N_P1", "P1"], "3002": ["PPMI-N_P2", "P2"]},
            "PPMI-G": {"3001": ["PPMI-G_P1", "P1"], "3002": ["PPMI-G_P2", "P2"]}
        }"#,
    );
    registry.check_paired_study_consistency().unwrap();

    let broken = seeded_registry(
        &root,
        r#"{
            "PPMI-N": {"3001": ["PPMI-N_P1", "P1"], "3002": ["PPMI-N_X2", "P2"]},
            "PPMI-G": {"3001": ["PPMI-G_P1", "P1"], "3002": ["PPMI-G_P2", "P2"]}
        }"#,
    );
    assert_matches!(
        broken.check_paired_study_consistency(),
        Err(QcError::PairedStudyMismatch { .. })
    );
}

#[test]
fn export_flattens_every_study() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);

    let table = registry.export().unwrap();

    assert_eq!(table.columns(), ["study", "sample_id", "GP2sampleID", "clinical_id"]);
    assert_eq!(table.len(), 2);
    let row = table.row(1).unwrap();
    assert_eq!(row.get("GP2sampleID"), Some("ABC_000002_s1"));
}

#[test]
fn batch_table_requires_all_id_columns() {
    let table = Table::from_literal(
        &["study", "sample_id", "GP2sampleID", "clinical_id"],
        &[&["ABC", "003", "ABC_000003_s1", ""]],
    )
    .unwrap();
    assert_matches!(samples_from_table(&table), Err(QcError::MissingData(_)));

    let partial = Table::from_literal(&["study", "sample_id"], &[&["ABC", "003"]]).unwrap();
    assert_matches!(samples_from_table(&partial), Err(QcError::MissingColumns(_)));
}

#[test]
fn removing_no_ids_is_rejected_without_backup() {
    let (_temp, root) = temp_root();
    let registry = seeded_registry(&root, SEED);
    let before = registry.store().get(&registry.location().key).unwrap();

    assert_matches!(
        registry.remove_samples("ABC", &[]),
        Err(QcError::MissingData(cols)) if cols == vec!["sample_id".to_string()]
    );
    assert_eq!(registry.store().get(&registry.location().key).unwrap(), before);
    assert!(registry.store().list("IDSTRACKER/ARCHIVE/").unwrap().is_empty());
}
