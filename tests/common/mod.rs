#![allow(dead_code)]

use camino::Utf8PathBuf;
use tempfile::TempDir;

use gp2qc::registry::{IdentityRegistry, RegistryLocation};
use gp2qc::schema;
use gp2qc::storage::{LocalObjectStore, ObjectStore};
use gp2qc::table::Table;

/// One manifest row: `(sample_id, clinical_id, GP2ID, SampleRepNo, manifest_id)`.
pub type SampleRow<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str);

fn default_value(column: &str) -> Option<&'static str> {
    match column {
        "study" => Some("ABC"),
        "study_type" => Some("Case(/Control)"),
        "GP2_phenotype" => Some("PD"),
        "study_arm" => Some("PD"),
        "diagnosis" => Some("Parkinson's disease"),
        "biological_sex_for_qc" => Some("Male"),
        "race_for_qc" => Some("White"),
        "family_history_for_qc" => Some("No"),
        "region_for_qc" => Some("GBR"),
        "Genotyping_site" => Some("UCL"),
        "filename" => Some("ABC_selfQCV3_2024_m1.csv"),
        _ => None,
    }
}

/// A full-template manifest for study `ABC`; `overrides` set
/// `(row, column, value)` with an empty value meaning missing.
pub fn manifest_with(rows: &[SampleRow<'_>], overrides: &[(usize, &str, &str)]) -> Table {
    let mut table = Table::new(schema::all_columns());
    for (index, (sample_id, clinical_id, gp2id, rep, mid)) in rows.iter().enumerate() {
        let cells = schema::all_columns()
            .map(|column| {
                if let Some((_, _, value)) = overrides
                    .iter()
                    .find(|(row, col, _)| *row == index && *col == column)
                {
                    return (!value.is_empty()).then(|| value.to_string());
                }
                let value = match column {
                    "sample_id" => sample_id.to_string(),
                    "clinical_id" => clinical_id.to_string(),
                    "GP2ID" => gp2id.to_string(),
                    "GP2sampleID" => format!("{gp2id}_{rep}"),
                    "SampleRepNo" => rep.to_string(),
                    "manifest_id" => mid.to_string(),
                    other => return default_value(other).map(str::to_string),
                };
                (!value.is_empty()).then_some(value)
            })
            .collect();
        table.push_row(cells).unwrap();
    }
    table
}

pub fn manifest(rows: &[SampleRow<'_>]) -> Table {
    manifest_with(rows, &[])
}

pub fn temp_root() -> (TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

/// Registry over a fresh local store seeded with `document`.
pub fn seeded_registry(root: &Utf8PathBuf, document: &str) -> IdentityRegistry<LocalObjectStore> {
    let store = LocalObjectStore::new(root.join("bucket"));
    let location = RegistryLocation::default();
    store.put(&location.key, document.as_bytes()).unwrap();
    IdentityRegistry::new(store, location)
}
