use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::domain::{ManifestId, PAIRED_STUDIES, SampleTriple, StudySample};
use crate::error::QcError;
use crate::intake::{self, StageOutcome};
use crate::output::ArtifactSink;
use crate::prompt::Decider;
use crate::reconcile::{
    self, LegacyExclusions, ManifestSource, ReconciliationReport, UNMATCHED_IDS_ARTIFACT,
};
use crate::registry::{AddResult, IdentityRegistry, RemoveResult, samples_from_table};
use crate::rules::{self, ValidateOptions, ValidationReport};
use crate::schema::{CLINICAL_ID, GP2_PHENOTYPE, GP2_SAMPLE_ID, MANIFEST_ID, SAMPLE_ID, STUDY};
use crate::storage::ObjectStore;
use crate::table::Table;

pub const REGISTRY_EXPORT_ARTIFACT: &str = "gp2_ids_mapper.csv";

#[derive(Debug, Clone, Serialize)]
pub struct CheckIdsResult {
    pub checked: usize,
    pub unmatched: Vec<StudySample>,
    pub artifact: Option<String>,
}

impl CheckIdsResult {
    pub fn is_consistent(&self) -> bool {
        self.unmatched.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairedCheckResult {
    pub left: String,
    pub right: String,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub rows: usize,
    pub artifact: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub save_name: String,
    pub manifest_id: String,
    pub rows: usize,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn phase(phase: &str, detail: impl AsRef<str>) -> Self {
        Self {
            message: format!("phase={phase}; {}", detail.as_ref()),
            elapsed: None,
        }
    }

    pub fn done(started: Instant) -> Self {
        Self {
            message: "done".to_string(),
            elapsed: Some(started.elapsed()),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing` for interactive runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct App<S: ObjectStore, M: ManifestSource, A: ArtifactSink> {
    registry: IdentityRegistry<S>,
    manifests: M,
    artifacts: A,
}

impl<S: ObjectStore, M: ManifestSource, A: ArtifactSink> App<S, M, A> {
    pub fn new(registry: IdentityRegistry<S>, manifests: M, artifacts: A) -> Self {
        Self {
            registry,
            manifests,
            artifacts,
        }
    }

    pub fn registry(&self) -> &IdentityRegistry<S> {
        &self.registry
    }

    pub fn validate(
        &self,
        table: &Table,
        options: ValidateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ValidationReport, QcError> {
        let started = Instant::now();
        sink.event(ProgressEvent::phase(
            "Validate",
            format!("{} rows, {} columns", table.len(), table.columns().len()),
        ));
        let report = rules::validate(table, options)?;
        sink.event(ProgressEvent::done(started));
        Ok(report)
    }

    pub fn add_samples(
        &self,
        table: &Table,
        sink: &dyn ProgressSink,
    ) -> Result<AddResult, QcError> {
        let started = Instant::now();
        sink.event(ProgressEvent::phase("Resolve", "reading sample batch"));
        let batch = samples_from_table(table)?;
        sink.event(ProgressEvent::phase(
            "Store",
            format!("adding {} samples", batch.len()),
        ));
        let result = self.registry.add_samples(&batch)?;
        sink.event(ProgressEvent::done(started));
        Ok(result)
    }

    pub fn remove_samples(
        &self,
        study: &str,
        sample_ids: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<RemoveResult, QcError> {
        let started = Instant::now();
        sink.event(ProgressEvent::phase(
            "Store",
            format!("removing {} samples from {study}", sample_ids.len()),
        ));
        let result = self.registry.remove_samples(study, sample_ids)?;
        sink.event(ProgressEvent::done(started));
        Ok(result)
    }

    /// Studies currently in the registry, for choosing a removal target.
    pub fn studies(&self) -> Result<Vec<String>, QcError> {
        Ok(self
            .registry
            .load()?
            .studies()
            .map(str::to_string)
            .collect())
    }

    /// Checks every `(sample_id, GP2sampleID, clinical_id)` of `table`
    /// against the registry, per study. Unmatched rows go to
    /// `unmatched_ids.csv`.
    pub fn check_ids(
        &self,
        table: &Table,
        sink: &dyn ProgressSink,
    ) -> Result<CheckIdsResult, QcError> {
        let started = Instant::now();
        let id_columns = [STUDY, SAMPLE_ID, GP2_SAMPLE_ID, CLINICAL_ID];
        rules::check_columns_exist(table, &id_columns)?;
        rules::check_missing_data(table, &id_columns)?;
        sink.event(ProgressEvent::phase("Resolve", "loading ID registry"));
        let registry = self.registry.load()?;

        let mut checked = 0;
        let mut unmatched = Vec::new();
        for study in table.distinct(STUDY) {
            let triples = table
                .rows()
                .filter(|row| row.get(STUDY) == Some(study.as_str()))
                .filter_map(|row| {
                    Some(SampleTriple::new(
                        row.get(SAMPLE_ID)?,
                        row.get(GP2_SAMPLE_ID)?,
                        row.get(CLINICAL_ID)?,
                    ))
                })
                .collect::<Vec<_>>();
            sink.event(ProgressEvent::phase(
                "Verify",
                format!("{study}: {} ids", triples.len()),
            ));
            checked += triples.len();
            unmatched.extend(
                registry
                    .verify_consistency(&study, &triples)?
                    .into_iter()
                    .map(|triple| StudySample {
                        study: study.clone(),
                        triple,
                    }),
            );
        }

        let artifact = if unmatched.is_empty() {
            info!(ids = checked, "all IDs are consistent with the ID registry");
            None
        } else {
            let keys = unmatched
                .iter()
                .map(|sample| sample.triple.clone())
                .collect::<BTreeSet<_>>();
            let rows = table.filter(|row| {
                match (row.get(SAMPLE_ID), row.get(GP2_SAMPLE_ID), row.get(CLINICAL_ID)) {
                    (Some(sample_id), Some(global_id), Some(clinical_id)) => {
                        keys.contains(&SampleTriple::new(sample_id, global_id, clinical_id))
                    }
                    _ => false,
                }
            });
            let report =
                rows.select(&[SAMPLE_ID, GP2_SAMPLE_ID, CLINICAL_ID, MANIFEST_ID, GP2_PHENOTYPE]);
            Some(self.artifacts.write(UNMATCHED_IDS_ARTIFACT, &report)?)
        };

        sink.event(ProgressEvent::done(started));
        Ok(CheckIdsResult {
            checked,
            unmatched,
            artifact,
        })
    }

    pub fn paired_check(&self, sink: &dyn ProgressSink) -> Result<PairedCheckResult, QcError> {
        let started = Instant::now();
        let (left, right) = PAIRED_STUDIES;
        sink.event(ProgressEvent::phase("Verify", format!("{left} against {right}")));
        let registry = self.registry.load()?;
        registry.check_paired_study_consistency()?;
        info!(left, right, "paired studies are consistent");
        sink.event(ProgressEvent::done(started));
        Ok(PairedCheckResult {
            left: left.to_string(),
            right: right.to_string(),
            samples: registry.study_len(left),
        })
    }

    /// Combines `current` with the study's prior manifests and checks the
    /// result against the replicate and registry invariants.
    pub fn reconcile(
        &self,
        current: &Table,
        columns: &[String],
        exclusions: &LegacyExclusions,
        sink: &dyn ProgressSink,
    ) -> Result<ReconciliationReport, QcError> {
        let started = Instant::now();
        let study = match current.distinct(STUDY).as_slice() {
            [] => return Err(QcError::EmptyManifest),
            [study] => study.clone(),
            studies => return Err(QcError::MixedStudy(studies.to_vec())),
        };

        sink.event(ProgressEvent::phase("Resolve", format!("loading history of {study}")));
        let master = self.manifests.master_sheet()?;
        let finalized = self.manifests.finalized(&study)?;
        let history = reconcile::load_history(&study, &master, finalized)?;

        sink.event(ProgressEvent::phase("Prepare", "combining manifests"));
        let combined = reconcile::combine(&history, current, exclusions)?;

        sink.event(ProgressEvent::phase(
            "Verify",
            format!("{} rows as {}", combined.table.len(), combined.manifest_id),
        ));
        let registry = self.registry.load()?;
        let report =
            reconcile::check_inconsistencies(&combined, columns, &registry, &self.artifacts)?;
        sink.event(ProgressEvent::done(started));
        Ok(report)
    }

    pub fn export_registry(&self, sink: &dyn ProgressSink) -> Result<ExportResult, QcError> {
        let started = Instant::now();
        sink.event(ProgressEvent::phase("Resolve", "loading ID registry"));
        let table = self.registry.export()?;
        let artifact = self.artifacts.write(REGISTRY_EXPORT_ARTIFACT, &table)?;
        sink.event(ProgressEvent::done(started));
        Ok(ExportResult {
            rows: table.len(),
            artifact,
        })
    }

    pub fn finalize(
        &self,
        file_name: &str,
        mid: ManifestId,
        table: Table,
        root: &Utf8Path,
        decider: &dyn Decider,
        sink: &dyn ProgressSink,
    ) -> Result<FinalizeResult, QcError> {
        let started = Instant::now();
        sink.event(ProgressEvent::phase("Prepare", format!("{file_name} as {mid}")));
        let prepared = intake::prepare_submission(file_name, mid, table)?;
        sink.event(ProgressEvent::phase("Store", format!("staging {}", prepared.save_name)));
        let outcome = intake::stage_finalized(&prepared, root, decider)?;
        sink.event(ProgressEvent::done(started));
        Ok(FinalizeResult {
            save_name: prepared.save_name.clone(),
            manifest_id: mid.to_string(),
            rows: prepared.table.len(),
            outcome,
        })
    }
}
