//! Global ID registry: `study -> sample_id -> [GP2sampleID, clinical_id]`.
//!
//! [`Registry`] is a plain value. Every mutation returns a new registry after
//! validating the whole batch, so a rejected batch never touches state.
//! [`IdentityRegistry`] owns the durable side: load, back up, write back.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{PAIRED_STUDIES, SampleTriple, StudySample, paired_study, swap_study_prefix};
use crate::error::QcError;
use crate::rules::check_missing_data;
use crate::schema::{CLINICAL_ID, GP2_SAMPLE_ID, SAMPLE_ID, STUDY};
use crate::storage::ObjectStore;
use crate::table::Table;

/// Stored as a two-element JSON array `[global_id, clinical_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry(pub String, pub String);

impl RegistryEntry {
    pub fn global_id(&self) -> &str {
        &self.0
    }

    pub fn clinical_id(&self) -> &str {
        &self.1
    }
}

type StudyEntries = BTreeMap<String, RegistryEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    studies: BTreeMap<String, StudyEntries>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub study: String,
    pub removed: usize,
    pub study_deleted: bool,
    pub partner: Option<PartnerRemoval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartnerRemoval {
    pub study: String,
    pub removed: usize,
    pub study_deleted: bool,
}

impl Registry {
    pub fn from_json(content: &[u8]) -> Result<Self, QcError> {
        serde_json::from_slice(content).map_err(|err| QcError::RegistryParse(err.to_string()))
    }

    /// Pretty JSON with four-space indentation.
    pub fn to_json(&self) -> Result<Vec<u8>, QcError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)
            .map_err(|err| QcError::RegistryParse(err.to_string()))?;
        Ok(out)
    }

    pub fn studies(&self) -> impl Iterator<Item = &str> {
        self.studies.keys().map(String::as_str)
    }

    pub fn contains_study(&self, study: &str) -> bool {
        self.studies.contains_key(study)
    }

    pub fn get(&self, study: &str, sample_id: &str) -> Option<&RegistryEntry> {
        self.studies.get(study)?.get(sample_id)
    }

    /// Total number of registered samples across studies.
    pub fn len(&self) -> usize {
        self.studies.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn study_len(&self, study: &str) -> usize {
        self.studies.get(study).map_or(0, BTreeMap::len)
    }

    pub fn triples(&self, study: &str) -> Vec<SampleTriple> {
        self.studies
            .get(study)
            .into_iter()
            .flatten()
            .map(|(sample_id, entry)| {
                SampleTriple::new(sample_id, entry.global_id(), entry.clinical_id())
            })
            .collect()
    }

    /// Returns the registry with `batch` added. The batch is rejected whole
    /// on any duplicate inside it or any collision with registered ids.
    pub fn with_samples(&self, batch: &[StudySample]) -> Result<Registry, QcError> {
        let mut keys = BTreeSet::new();
        let mut dup_keys = BTreeSet::new();
        let mut globals = BTreeSet::new();
        let mut dup_globals = BTreeSet::new();
        for sample in batch {
            if !keys.insert((sample.study.as_str(), sample.triple.sample_id.as_str())) {
                dup_keys.insert(format!("{}/{}", sample.study, sample.triple.sample_id));
            }
            if !globals.insert(sample.triple.global_id.as_str()) {
                dup_globals.insert(sample.triple.global_id.clone());
            }
        }
        if !dup_keys.is_empty() {
            return Err(QcError::DuplicateKey {
                field: "study/sample_id".to_string(),
                values: dup_keys.into_iter().collect(),
            });
        }
        if !dup_globals.is_empty() {
            return Err(QcError::DuplicateKey {
                field: GP2_SAMPLE_ID.to_string(),
                values: dup_globals.into_iter().collect(),
            });
        }

        let unprefixed = batch
            .iter()
            .filter(|sample| !sample.triple.global_id.starts_with(&sample.study))
            .map(|sample| sample.triple.global_id.clone())
            .collect::<Vec<_>>();
        if !unprefixed.is_empty() {
            return Err(QcError::GlobalIdStudyMismatch(unprefixed));
        }

        let mut by_study = BTreeMap::<&str, Vec<&SampleTriple>>::new();
        for sample in batch {
            by_study
                .entry(sample.study.as_str())
                .or_default()
                .push(&sample.triple);
        }
        for (study, triples) in &by_study {
            let Some(existing) = self.studies.get(*study) else {
                continue;
            };
            let taken_ids = triples
                .iter()
                .filter(|triple| existing.contains_key(&triple.sample_id))
                .map(|triple| triple.sample_id.clone())
                .collect::<Vec<_>>();
            if !taken_ids.is_empty() {
                return Err(QcError::ConflictWithRegistry {
                    study: study.to_string(),
                    field: SAMPLE_ID.to_string(),
                    values: taken_ids,
                });
            }
            let registered = existing
                .values()
                .map(RegistryEntry::global_id)
                .collect::<BTreeSet<_>>();
            let taken_globals = triples
                .iter()
                .filter(|triple| registered.contains(triple.global_id.as_str()))
                .map(|triple| triple.global_id.clone())
                .collect::<Vec<_>>();
            if !taken_globals.is_empty() {
                return Err(QcError::ConflictWithRegistry {
                    study: study.to_string(),
                    field: GP2_SAMPLE_ID.to_string(),
                    values: taken_globals,
                });
            }
        }

        let mut next = self.clone();
        for sample in batch {
            next.studies
                .entry(sample.study.clone())
                .or_default()
                .insert(
                    sample.triple.sample_id.clone(),
                    RegistryEntry(
                        sample.triple.global_id.clone(),
                        sample.triple.clinical_id.clone(),
                    ),
                );
        }

        let touches_pair = by_study.keys().any(|study| paired_study(study).is_some());
        let (left, right) = PAIRED_STUDIES;
        if touches_pair && next.contains_study(left) && next.contains_study(right) {
            next.check_paired_study_consistency()?;
        }
        Ok(next)
    }

    /// Returns the registry without `sample_ids` in `study`. Removing from one
    /// paired study removes the same ids from its partner. An empty id list
    /// is rejected.
    pub fn without_samples(
        &self,
        study: &str,
        sample_ids: &[String],
    ) -> Result<(Registry, Removal), QcError> {
        if sample_ids.is_empty() {
            return Err(QcError::MissingData(vec![SAMPLE_ID.to_string()]));
        }
        let entries = self
            .studies
            .get(study)
            .ok_or_else(|| QcError::UnknownStudy(study.to_string()))?;
        let requested = sample_ids
            .iter()
            .map(String::as_str)
            .collect::<BTreeSet<_>>();
        let unknown = requested
            .iter()
            .filter(|id| !entries.contains_key(**id))
            .map(|id| id.to_string())
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            return Err(QcError::UnknownSampleId {
                study: study.to_string(),
                ids: unknown,
            });
        }

        let mut next = self.clone();
        let (removed, study_deleted) = next.remove_from(study, &requested);
        let partner = match paired_study(study) {
            Some(partner) if next.contains_study(partner) => {
                let (removed, study_deleted) = next.remove_from(partner, &requested);
                if removed < requested.len() {
                    warn!(
                        study = partner,
                        missing = requested.len() - removed,
                        "paired study lacked some removed sample ids"
                    );
                }
                Some(PartnerRemoval {
                    study: partner.to_string(),
                    removed,
                    study_deleted,
                })
            }
            _ => None,
        };

        Ok((
            next,
            Removal {
                study: study.to_string(),
                removed,
                study_deleted,
                partner,
            },
        ))
    }

    fn remove_from(&mut self, study: &str, ids: &BTreeSet<&str>) -> (usize, bool) {
        let Some(entries) = self.studies.get_mut(study) else {
            return (0, false);
        };
        let before = entries.len();
        entries.retain(|sample_id, _| !ids.contains(sample_id.as_str()));
        let removed = before - entries.len();
        let emptied = entries.is_empty();
        if emptied {
            self.studies.remove(study);
        }
        (removed, emptied)
    }

    /// Candidates that do not exactly match a registered triple of `study`.
    /// For paired studies a global id under the partner's prefix also matches.
    pub fn verify_consistency(
        &self,
        study: &str,
        candidates: &[SampleTriple],
    ) -> Result<Vec<SampleTriple>, QcError> {
        let entries = self
            .studies
            .get(study)
            .ok_or_else(|| QcError::UnknownStudy(study.to_string()))?;
        let partner = paired_study(study);

        let accepted = |triple: &SampleTriple| {
            let own = entries.get(&triple.sample_id);
            if matches_entry(own, triple, &triple.global_id) {
                return true;
            }
            let Some(partner) = partner else {
                return false;
            };
            let as_own = swap_study_prefix(&triple.global_id, partner, study);
            if as_own.is_some_and(|gid| matches_entry(own, triple, &gid)) {
                return true;
            }
            let theirs = self
                .studies
                .get(partner)
                .and_then(|other| other.get(&triple.sample_id));
            let as_partner = swap_study_prefix(&triple.global_id, study, partner);
            matches_entry(theirs, triple, &triple.global_id)
                || as_partner.is_some_and(|gid| matches_entry(theirs, triple, &gid))
        };

        Ok(candidates
            .iter()
            .filter(|triple| !accepted(*triple))
            .cloned()
            .collect())
    }

    /// The paired studies must hold identical `(sample_id, clinical_id)` sets
    /// and register every sample as `{study}_{clinical_id}`.
    pub fn check_paired_study_consistency(&self) -> Result<(), QcError> {
        let (left, right) = PAIRED_STUDIES;
        let mismatch = |reason: String| QcError::PairedStudyMismatch {
            left: left.to_string(),
            right: right.to_string(),
            reason,
        };
        let empty = StudyEntries::new();
        let left_entries = self.studies.get(left).unwrap_or(&empty);
        let right_entries = self.studies.get(right).unwrap_or(&empty);

        let pairs = |entries: &StudyEntries| {
            entries
                .iter()
                .map(|(sample_id, entry)| (sample_id.clone(), entry.clinical_id().to_string()))
                .collect::<BTreeSet<_>>()
        };
        let left_pairs = pairs(left_entries);
        let right_pairs = pairs(right_entries);
        let unmatched = left_pairs
            .symmetric_difference(&right_pairs)
            .map(|(sample_id, clinical_id)| format!("{sample_id}/{clinical_id}"))
            .collect::<Vec<_>>();
        if !unmatched.is_empty() {
            return Err(mismatch(format!(
                "{} unmatched (sample_id, clinical_id) pairs: {unmatched:?}",
                unmatched.len()
            )));
        }

        for (study, entries) in [(left, left_entries), (right, right_entries)] {
            let malformed = entries
                .values()
                .filter(|entry| entry.global_id() != format!("{study}_{}", entry.clinical_id()))
                .map(|entry| entry.global_id().to_string())
                .collect::<Vec<_>>();
            if !malformed.is_empty() {
                return Err(mismatch(format!(
                    "{study} GP2sampleID must be {study}_<clinical_id>: {malformed:?}"
                )));
            }
        }
        Ok(())
    }

    /// Flattens the registry into `study, sample_id, GP2sampleID, clinical_id` rows.
    pub fn to_table(&self) -> Result<Table, QcError> {
        let mut table = Table::new([STUDY, SAMPLE_ID, GP2_SAMPLE_ID, CLINICAL_ID]);
        for (study, entries) in &self.studies {
            for (sample_id, entry) in entries {
                table.push_row(vec![
                    Some(study.clone()),
                    Some(sample_id.clone()),
                    Some(entry.global_id().to_string()),
                    Some(entry.clinical_id().to_string()),
                ])?;
            }
        }
        Ok(table)
    }
}

fn matches_entry(entry: Option<&RegistryEntry>, candidate: &SampleTriple, global_id: &str) -> bool {
    entry.is_some_and(|entry| {
        entry.global_id() == global_id && entry.clinical_id() == candidate.clinical_id
    })
}

/// Reads an add-batch table with `study, sample_id, GP2sampleID, clinical_id`.
pub fn samples_from_table(table: &Table) -> Result<Vec<StudySample>, QcError> {
    let columns = [STUDY, SAMPLE_ID, GP2_SAMPLE_ID, CLINICAL_ID];
    crate::rules::check_columns_exist(table, &columns)?;
    check_missing_data(table, &columns)?;
    Ok(table
        .rows()
        .filter_map(|row| {
            Some(StudySample {
                study: row.get(STUDY)?.to_string(),
                triple: SampleTriple::new(
                    row.get(SAMPLE_ID)?,
                    row.get(GP2_SAMPLE_ID)?,
                    row.get(CLINICAL_ID)?,
                ),
            })
        })
        .collect())
}

/// Where the registry document and its backups live in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    pub key: String,
    pub archive_prefix: String,
    pub backup_stem: String,
}

impl Default for RegistryLocation {
    fn default() -> Self {
        Self {
            key: "IDSTRACKER/GP2IDSMAPPER.json".to_string(),
            archive_prefix: "IDSTRACKER/ARCHIVE".to_string(),
            backup_stem: "GP2IDSMAPPER".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddResult {
    pub added: BTreeMap<String, usize>,
    pub backup: String,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    #[serde(flatten)]
    pub removal: Removal,
    pub backup: String,
    pub total: usize,
}

/// Durable registry. Single writer: nothing guards the load/write cycle
/// against a concurrent process.
pub struct IdentityRegistry<S: ObjectStore> {
    store: S,
    location: RegistryLocation,
}

impl<S: ObjectStore> IdentityRegistry<S> {
    pub fn new(store: S, location: RegistryLocation) -> Self {
        Self { store, location }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn location(&self) -> &RegistryLocation {
        &self.location
    }

    pub fn load(&self) -> Result<Registry, QcError> {
        let content = self.store.get(&self.location.key)?;
        Registry::from_json(&content)
    }

    /// Copies the current document to `{archive}/{stem}_{op}_{YYYYMMDD_HHMM}.json`.
    pub fn backup(&self, op: &str) -> Result<String, QcError> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M");
        let backup_key = format!(
            "{}/{}_{op}_{timestamp}.json",
            self.location.archive_prefix.trim_end_matches('/'),
            self.location.backup_stem
        );
        self.store.copy(&self.location.key, &backup_key)?;
        info!(backup = %backup_key, "registry backed up");
        Ok(backup_key)
    }

    fn commit(&self, op: &str, registry: &Registry) -> Result<String, QcError> {
        let content = registry.to_json()?;
        let backup_key = self.backup(op)?;
        self.store.put(&self.location.key, &content)?;
        info!(key = %self.location.key, samples = registry.len(), "registry saved");
        Ok(backup_key)
    }

    pub fn add_samples(&self, batch: &[StudySample]) -> Result<AddResult, QcError> {
        let mut added = BTreeMap::<String, usize>::new();
        for sample in batch {
            *added.entry(sample.study.clone()).or_default() += 1;
        }
        for (study, count) in &added {
            info!(study = %study, count, "sample ids to add");
        }

        let current = self.load()?;
        let next = current.with_samples(batch)?;
        let backup = self.commit("before_add", &next)?;
        Ok(AddResult {
            added,
            backup,
            total: next.len(),
        })
    }

    pub fn remove_samples(
        &self,
        study: &str,
        sample_ids: &[String],
    ) -> Result<RemoveResult, QcError> {
        let current = self.load()?;
        let (next, removal) = current.without_samples(study, sample_ids)?;
        let backup = self.commit(&format!("before_rm_{study}"), &next)?;
        info!(study, removed = removal.removed, "sample ids removed");
        Ok(RemoveResult {
            removal,
            backup,
            total: next.len(),
        })
    }

    pub fn verify_consistency(
        &self,
        study: &str,
        candidates: &[SampleTriple],
    ) -> Result<Vec<SampleTriple>, QcError> {
        self.load()?.verify_consistency(study, candidates)
    }

    pub fn check_paired_study_consistency(&self) -> Result<(), QcError> {
        self.load()?.check_paired_study_consistency()
    }

    pub fn export(&self) -> Result<Table, QcError> {
        self.load()?.to_table()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn sample(study: &str, sample_id: &str, global_id: &str, clinical_id: &str) -> StudySample {
        StudySample {
            study: study.to_string(),
            triple: SampleTriple::new(sample_id, global_id, clinical_id),
        }
    }

    #[test]
    fn json_layout_is_array_pairs() {
        let registry = Registry::default()
            .with_samples(&[sample("ABC", "001", "ABC_000001", "C1")])
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&registry.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"ABC": {"001": ["ABC_000001", "C1"]}}));
        assert_eq!(Registry::from_json(&registry.to_json().unwrap()).unwrap(), registry);
    }

    #[test]
    fn batch_duplicates_are_rejected() {
        let err = Registry::default()
            .with_samples(&[
                sample("ABC", "001", "ABC_1", "C1"),
                sample("ABC", "001", "ABC_2", "C2"),
            ])
            .unwrap_err();
        assert_matches!(err, QcError::DuplicateKey { field, .. } if field == "study/sample_id");

        let err = Registry::default()
            .with_samples(&[
                sample("ABC", "001", "ABC_1", "C1"),
                sample("ABC", "002", "ABC_1", "C2"),
            ])
            .unwrap_err();
        assert_matches!(err, QcError::DuplicateKey { field, .. } if field == "GP2sampleID");
    }

    #[test]
    fn registered_global_id_conflicts() {
        let registry = Registry::default()
            .with_samples(&[sample("ABC", "001", "ABC_1", "C1")])
            .unwrap();
        let err = registry
            .with_samples(&[sample("ABC", "002", "ABC_1", "C2")])
            .unwrap_err();
        assert_matches!(
            err,
            QcError::ConflictWithRegistry { field, values, .. }
                if field == "GP2sampleID" && values == vec!["ABC_1".to_string()]
        );
    }

    #[test]
    fn global_id_must_carry_study_prefix() {
        let err = Registry::default()
            .with_samples(&[sample("ABC", "001", "XYZ_1", "C1")])
            .unwrap_err();
        assert_matches!(err, QcError::GlobalIdStudyMismatch(ids) if ids == vec!["XYZ_1".to_string()]);
    }

    #[test]
    fn paired_removal_cascades() {
        let registry = Registry::default()
            .with_samples(&[
                sample("PPMI-N", "S1", "PPMI-N_C1", "C1"),
                sample("PPMI-N", "S2", "PPMI-N_C2", "C2"),
                sample("PPMI-G", "S1", "PPMI-G_C1", "C1"),
                sample("PPMI-G", "S2", "PPMI-G_C2", "C2"),
            ])
            .unwrap();
        let (next, removal) = registry
            .without_samples("PPMI-G", &["S2".to_string()])
            .unwrap();
        assert_eq!(removal.removed, 1);
        assert_eq!(removal.partner.as_ref().map(|p| p.removed), Some(1));
        assert_eq!(next.study_len("PPMI-N"), 1);
        assert_eq!(next.study_len("PPMI-G"), 1);
        next.check_paired_study_consistency().unwrap();
    }

    #[test]
    fn paired_batch_must_stay_consistent() {
        let err = Registry::default()
            .with_samples(&[
                sample("PPMI-N", "S1", "PPMI-N_C1", "C1"),
                sample("PPMI-G", "S1", "PPMI-G_C9", "C1"),
            ])
            .unwrap_err();
        assert_matches!(err, QcError::PairedStudyMismatch { .. });
    }

    #[test]
    fn paired_prefix_is_interchangeable_in_verification() {
        let registry = Registry::default()
            .with_samples(&[
                sample("PPMI-N", "S1", "PPMI-N_C1", "C1"),
                sample("PPMI-G", "S1", "PPMI-G_C1", "C1"),
            ])
            .unwrap();
        let candidates = vec![
            SampleTriple::new("S1", "PPMI-G_C1", "C1"),
            SampleTriple::new("S1", "PPMI-N_C1", "C1"),
            SampleTriple::new("S1", "PPMI-N_C2", "C1"),
        ];
        let unmatched = registry.verify_consistency("PPMI-N", &candidates).unwrap();
        assert_eq!(unmatched, vec![SampleTriple::new("S1", "PPMI-N_C2", "C1")]);
    }
}
