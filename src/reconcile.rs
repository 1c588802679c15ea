//! Cross-manifest reconciliation for one study.
//!
//! The steps are separate values so each can be inspected on its own:
//! [`load_history`] gives a [`ManifestHistory`], [`combine`] appends the
//! incoming manifest and yields a [`CombinedManifest`], and
//! [`check_inconsistencies`] produces the final [`ReconciliationReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ManifestId, SampleTriple, replicate_sort_key, study_of};
use crate::error::QcError;
use crate::output::ArtifactSink;
use crate::registry::Registry;
use crate::rules::{self, ValidateOptions, ValidationReport};
use crate::schema::{
    CLINICAL_ID, GP2_PHENOTYPE, GP2_SAMPLE_ID, GP2ID, MANIFEST_ID, RETIRED_COLUMNS, SAMPLE_ID,
    SAMPLE_REP_NO, STUDY,
};
use crate::table::Table;

pub const UNMATCHED_IDS_ARTIFACT: &str = "unmatched_ids.csv";

pub fn inconsistency_artifact(column: &str) -> String {
    format!("inconsistency_{column}.csv")
}

/// A manifest already staged in the finalized folder.
#[derive(Debug, Clone)]
pub struct FinalizedManifest {
    pub name: String,
    pub table: Table,
}

impl FinalizedManifest {
    /// Batch id encoded as the last `_` token of the file stem (`..._m3.csv`).
    pub fn batch_id(&self) -> &str {
        let stem = self.name.strip_suffix(".csv").unwrap_or(&self.name);
        stem.rsplit('_').next().unwrap_or(stem)
    }
}

/// Where prior manifests of a study come from.
pub trait ManifestSource {
    /// Accumulated master sheet of every study.
    fn master_sheet(&self) -> Result<Table, QcError>;
    fn finalized(&self, study: &str) -> Result<Vec<FinalizedManifest>, QcError>;
}

/// Master sheet CSV plus `{finalized_root}/{study}/*.csv`.
#[derive(Debug, Clone)]
pub struct DirManifestSource {
    master_sheet: Utf8PathBuf,
    finalized_root: Utf8PathBuf,
}

impl DirManifestSource {
    pub fn new(
        master_sheet: impl Into<Utf8PathBuf>,
        finalized_root: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            master_sheet: master_sheet.into(),
            finalized_root: finalized_root.into(),
        }
    }

    pub fn study_dir(&self, study: &str) -> Utf8PathBuf {
        self.finalized_root.join(study)
    }
}

impl ManifestSource for DirManifestSource {
    fn master_sheet(&self) -> Result<Table, QcError> {
        if !self.master_sheet.as_std_path().is_file() {
            return Err(QcError::Filesystem(format!(
                "master sheet path '{}' not found",
                self.master_sheet
            )));
        }
        Table::read_path(&self.master_sheet)
    }

    fn finalized(&self, study: &str) -> Result<Vec<FinalizedManifest>, QcError> {
        let dir = self.study_dir(study);
        if !dir.as_std_path().is_dir() {
            return Err(QcError::MissingStagingDirectory(dir.into_std_path_buf()));
        }
        let mut paths = fs::read_dir(dir.as_std_path())
            .map_err(|err| QcError::Filesystem(err.to_string()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
            .filter(|path| path.extension() == Some("csv"))
            .collect::<Vec<_>>();
        paths.sort();
        paths
            .into_iter()
            .map(|path| {
                Ok(FinalizedManifest {
                    name: file_name(&path),
                    table: Table::read_path(&path)?,
                })
            })
            .collect()
    }
}

fn file_name(path: &Utf8Path) -> String {
    path.file_name().unwrap_or(path.as_str()).to_string()
}

/// Prior manifests of a study: master-sheet rows plus finalized files the
/// master sheet has not absorbed yet.
#[derive(Debug, Clone)]
pub struct ManifestHistory {
    pub study: String,
    pub table: Table,
}

impl ManifestHistory {
    pub fn manifest_ids(&self) -> Result<Vec<ManifestId>, QcError> {
        let mut ids = self
            .table
            .distinct(MANIFEST_ID)
            .iter()
            .map(|mid| mid.parse::<ManifestId>())
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort();
        Ok(ids)
    }
}

pub fn load_history(
    study: &str,
    master: &Table,
    finalized: Vec<FinalizedManifest>,
) -> Result<ManifestHistory, QcError> {
    let mut table = master.filter(|row| row.get(STUDY) == Some(study));
    let recorded = table.distinct(MANIFEST_ID);

    let mut batch_ids = BTreeSet::new();
    for manifest in &finalized {
        if !batch_ids.insert(manifest.batch_id()) {
            return Err(QcError::DuplicateManifestFile(manifest.batch_id().to_string()));
        }
    }

    if finalized.is_empty() {
        info!(study, "no manifest files found in the finalized folder");
    }
    for manifest in finalized {
        if recorded.iter().any(|mid| mid == manifest.batch_id()) {
            continue;
        }
        info!(file = %manifest.name, "adding finalized manifest not yet in the master sheet");
        table = table.concat(&manifest.table);
    }

    if table.is_empty() {
        info!(study, "no previous manifests found");
    } else {
        let mut counts = BTreeMap::<&str, usize>::new();
        for row in table.rows() {
            *counts.entry(row.get(MANIFEST_ID).unwrap_or("NA")).or_default() += 1;
        }
        for (mid, count) in counts {
            info!(study, manifest_id = mid, samples = count, "previous submission");
        }
    }

    Ok(ManifestHistory {
        study: study.to_string(),
        table,
    })
}

/// Global ids with known historical defects, skipped during reconciliation.
#[derive(Debug, Clone, Default)]
pub struct LegacyExclusions {
    ids: BTreeSet<String>,
}

impl LegacyExclusions {
    pub fn new<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// One GP2sampleID per line; blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Self {
        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|line| {
                    !line.is_empty() && !line.starts_with('#') && *line != GP2_SAMPLE_ID
                }),
        )
    }

    pub fn contains(&self, global_id: &str) -> bool {
        self.ids.contains(global_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CombinedManifest {
    pub study: String,
    pub manifest_id: ManifestId,
    pub table: Table,
    /// `(sample_id, GP2sampleID)` pairs dropped as legacy exceptions.
    pub excluded: BTreeSet<(String, String)>,
}

pub fn combine(
    history: &ManifestHistory,
    current: &Table,
    exclusions: &LegacyExclusions,
) -> Result<CombinedManifest, QcError> {
    if current.is_empty() {
        return Err(QcError::EmptyManifest);
    }

    let mut studies = BTreeSet::from([history.study.clone()]);
    studies.extend(history.table.distinct(STUDY));
    studies.extend(current.distinct(STUDY));
    if studies.len() > 1 {
        return Err(QcError::MixedStudy(studies.into_iter().collect()));
    }

    let mids = current.distinct(MANIFEST_ID);
    let manifest_id = match mids.as_slice() {
        [] => return Err(QcError::MissingData(vec![MANIFEST_ID.to_string()])),
        [mid] => mid.parse::<ManifestId>()?,
        _ => return Err(QcError::MultipleCurrentManifestIds(mids.clone())),
    };
    info!(manifest_id = %manifest_id, "manifest_id of the current manifest");

    let prior = history.manifest_ids()?;
    let mut expected = ManifestId::new(1)?;
    for mid in &prior {
        if *mid != expected {
            return Err(QcError::ManifestIdOutOfSequence {
                expected: expected.to_string(),
                found: mid.to_string(),
            });
        }
        expected = expected.next();
    }
    if manifest_id != expected {
        return Err(QcError::ManifestIdOutOfSequence {
            expected: expected.to_string(),
            found: manifest_id.to_string(),
        });
    }
    if !prior.is_empty() {
        info!(
            previous = ?prior.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "combined with previous manifests"
        );
    }

    let combined = history.table.concat(current).drop_columns(RETIRED_COLUMNS);

    let mut excluded = BTreeSet::new();
    let table = combined.filter(|row| match row.get(GP2_SAMPLE_ID) {
        Some(gid) if exclusions.contains(gid) => {
            excluded.insert((
                row.get(SAMPLE_ID).unwrap_or_default().to_string(),
                gid.to_string(),
            ));
            false
        }
        _ => true,
    });
    if !excluded.is_empty() {
        info!(rows = excluded.len(), "legacy exceptions excluded");
    }

    Ok(CombinedManifest {
        study: history.study.clone(),
        manifest_id,
        table,
        excluded,
    })
}

/// Rows of identifiers whose `column` disagrees across replicates, pivoted to
/// `GP2ID, {column}_{rep}.., study`. Missing counts as its own value.
pub fn find_inconsistency(table: &Table, column: &str) -> Result<Table, QcError> {
    let mut values = BTreeMap::<&str, BTreeSet<Option<&str>>>::new();
    for row in table.rows() {
        if let Some(gp2id) = row.get(GP2ID) {
            values.entry(gp2id).or_default().insert(row.get(column));
        }
    }
    let conflicted = values
        .into_iter()
        .filter(|(_, distinct)| distinct.len() > 1)
        .map(|(gp2id, _)| gp2id)
        .collect::<BTreeSet<_>>();

    let mut cells = BTreeMap::<&str, BTreeMap<&str, Option<&str>>>::new();
    let mut replicates = BTreeSet::new();
    for row in table.rows() {
        let Some(gp2id) = row.get(GP2ID).filter(|id| conflicted.contains(id)) else {
            continue;
        };
        let Some(rep) = row.get(SAMPLE_REP_NO) else {
            warn!(gp2id, column, "row without SampleRepNo skipped");
            continue;
        };
        replicates.insert(rep);
        let slots = cells.entry(gp2id).or_default();
        if slots.contains_key(rep) {
            warn!(gp2id, rep, column, "duplicate replicate; keeping the first value");
            continue;
        }
        slots.insert(rep, row.get(column));
    }

    let mut replicates = replicates.into_iter().collect::<Vec<_>>();
    replicates.sort_by_key(|rep| replicate_sort_key(rep));

    let mut header = vec![GP2ID.to_string()];
    header.extend(replicates.iter().map(|rep| format!("{column}_{rep}")));
    header.push(STUDY.to_string());
    let mut report = Table::new(header);
    for (gp2id, slots) in cells {
        let mut record = vec![Some(gp2id.to_string())];
        record.extend(
            replicates
                .iter()
                .map(|rep| slots.get(rep).copied().flatten().map(str::to_string)),
        );
        record.push(Some(study_of(gp2id).to_string()));
        report.push_row(record)?;
    }
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnFinding {
    pub column: String,
    pub conflicted: usize,
    pub artifact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub study: String,
    pub manifest_id: String,
    pub rows: usize,
    pub validation: ValidationReport,
    pub passed_columns: Vec<String>,
    pub failed_columns: Vec<ColumnFinding>,
    pub checked_ids: usize,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.failed_columns.is_empty()
    }
}

/// Validates the combined table, reports per-column replicate conflicts
/// (soft: each column gets its own artifact), then cross-checks every ID
/// triple against `registry` (hard: mismatches abort).
pub fn check_inconsistencies(
    combined: &CombinedManifest,
    columns: &[String],
    registry: &Registry,
    artifacts: &dyn ArtifactSink,
) -> Result<ReconciliationReport, QcError> {
    let table = &combined.table;
    let column_refs = columns.iter().map(String::as_str).collect::<Vec<_>>();
    rules::check_columns_exist(table, &column_refs)?;

    let validation = rules::validate(
        table,
        ValidateOptions {
            strict_single_study: false,
        },
    )?;

    let mut passed_columns = Vec::new();
    let mut failed_columns = Vec::new();
    for column in columns {
        let report = find_inconsistency(table, column)?;
        if report.is_empty() {
            info!(column = %column, "PASS");
            passed_columns.push(column.clone());
            continue;
        }
        let artifact = artifacts.write(&inconsistency_artifact(column), &report)?;
        warn!(
            column = %column,
            entries = report.len(),
            artifact = %artifact,
            "FAIL: inconsistent entries"
        );
        failed_columns.push(ColumnFinding {
            column: column.clone(),
            conflicted: report.len(),
            artifact,
        });
    }

    let triples = table
        .rows()
        .filter_map(|row| {
            Some(SampleTriple::new(
                row.get(SAMPLE_ID)?,
                row.get(GP2_SAMPLE_ID)?,
                row.get(CLINICAL_ID)?,
            ))
        })
        .filter(|triple| {
            !combined
                .excluded
                .contains(&(triple.sample_id.clone(), triple.global_id.clone()))
        })
        .collect::<Vec<_>>();
    let unmatched = registry
        .verify_consistency(&combined.study, &triples)?
        .into_iter()
        .collect::<BTreeSet<_>>();
    if !unmatched.is_empty() {
        let rows = table.filter(|row| {
            match (row.get(SAMPLE_ID), row.get(GP2_SAMPLE_ID), row.get(CLINICAL_ID)) {
                (Some(sample_id), Some(global_id), Some(clinical_id)) => {
                    unmatched.contains(&SampleTriple::new(sample_id, global_id, clinical_id))
                }
                _ => false,
            }
        });
        let report =
            rows.select(&[SAMPLE_ID, GP2_SAMPLE_ID, CLINICAL_ID, MANIFEST_ID, GP2_PHENOTYPE]);
        let artifact = artifacts.write(UNMATCHED_IDS_ARTIFACT, &report)?;
        return Err(QcError::RegistryMismatch {
            count: report.len(),
            artifact,
        });
    }
    info!(ids = triples.len(), "all IDs are consistent with the ID registry");
    debug!(study = %combined.study, "reconciliation complete");

    Ok(ReconciliationReport {
        study: combined.study.clone(),
        manifest_id: combined.manifest_id.to_string(),
        rows: table.len(),
        validation,
        passed_columns,
        failed_columns,
        checked_ids: triples.len(),
    })
}
