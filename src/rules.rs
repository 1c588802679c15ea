//! Manifest validation gate.
//!
//! Checks run in a fixed order and the first failure short-circuits. The
//! functions are pure over the input [`Table`]; advisory findings come back
//! in the [`ValidationReport`] and are also logged.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::QcError;
use crate::schema::{
    self, AGE_COLUMNS, BASE_COLUMNS, CLINICAL_ID, CONTROLLED_COLUMNS, DIAGNOSIS,
    FAMILY_HISTORY_FOR_QC, GP2_PHENOTYPE, GP2ID, REQUIRED_COLUMNS, SAMPLE_ID, STUDY, STUDY_ARM,
    STUDY_TYPE,
};
use crate::table::Table;

#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Reject tables carrying more than one study. Off for merged master tables.
    pub strict_single_study: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            strict_single_study: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// Control phenotype inside a Prodromal study; usually meant "Prodromal".
    ProdromalControl { rows: usize },
    /// A study arm spans several diagnoses; arms may need splitting.
    StudyArmMultipleDiagnoses { study_arms: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub study_arm: String,
    pub study_type: String,
    pub diagnosis: String,
    pub gp2_phenotype: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub rows: usize,
    pub studies: Vec<String>,
    pub summary: Vec<GroupCount>,
    pub advisories: Vec<Advisory>,
}

pub fn validate(table: &Table, options: ValidateOptions) -> Result<ValidationReport, QcError> {
    let all_columns = schema::all_columns().collect::<Vec<_>>();
    check_columns_exist(table, &all_columns)?;
    check_unexpected_columns(table, &all_columns)?;
    check_missing_data(table, REQUIRED_COLUMNS)?;

    if options.strict_single_study {
        check_one_study(table)?;
    }

    check_unique_ids(table)?;
    check_clinical_identity(table)?;
    validate_allowed_values(table)?;
    validate_numeric_columns(table)?;
    let mut advisories = validate_specific_conditions(table)?;

    info!("all checks passed");
    let summary = summarize(table);
    for group in &summary {
        info!(
            study_arm = %group.study_arm,
            study_type = %group.study_type,
            diagnosis = %group.diagnosis,
            phenotype = %group.gp2_phenotype,
            count = group.count,
            "summary"
        );
    }

    let mut diagnoses_per_arm = BTreeMap::<&str, BTreeSet<Option<&str>>>::new();
    for row in table.rows() {
        if let Some(arm) = row.get(STUDY_ARM) {
            diagnoses_per_arm
                .entry(arm)
                .or_default()
                .insert(row.get(DIAGNOSIS));
        }
    }
    let crowded = diagnoses_per_arm
        .into_iter()
        .filter(|(_, diagnoses)| diagnoses.len() > 1)
        .map(|(arm, _)| arm.to_string())
        .collect::<Vec<_>>();
    if !crowded.is_empty() {
        warn!(
            study_arms = ?crowded,
            "multiple diagnoses in the same study_arm; separate differently recruited arms"
        );
        advisories.push(Advisory::StudyArmMultipleDiagnoses {
            study_arms: crowded,
        });
    }

    Ok(ValidationReport {
        rows: table.len(),
        studies: table.distinct(STUDY),
        summary,
        advisories,
    })
}

pub fn check_columns_exist(table: &Table, required: &[&str]) -> Result<(), QcError> {
    let mut missing = required
        .iter()
        .filter(|col| !table.has_column(col))
        .map(|col| col.to_string())
        .collect::<Vec<_>>();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort();
    Err(QcError::MissingColumns(missing))
}

pub fn check_unexpected_columns(table: &Table, expected: &[&str]) -> Result<(), QcError> {
    let mut unexpected = table
        .columns()
        .iter()
        .filter(|col| !expected.contains(&col.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if unexpected.is_empty() {
        return Ok(());
    }
    unexpected.sort();
    Err(QcError::UnexpectedColumns(unexpected))
}

/// Fails with the required columns that hold at least one missing value.
pub fn check_missing_data(table: &Table, required: &[&str]) -> Result<(), QcError> {
    let incomplete = required
        .iter()
        .filter(|col| table.rows().any(|row| row.get(col).is_none()))
        .map(|col| col.to_string())
        .collect::<Vec<_>>();
    if incomplete.is_empty() {
        Ok(())
    } else {
        Err(QcError::MissingData(incomplete))
    }
}

pub fn check_one_study(table: &Table) -> Result<(), QcError> {
    let studies = table.distinct(STUDY);
    if studies.len() > 1 {
        return Err(QcError::MultipleStudies(studies));
    }
    Ok(())
}

/// Splits rows by study; studies iterate in sorted order.
fn rows_by_study(table: &Table) -> BTreeMap<&str, Vec<crate::table::Row<'_>>> {
    let mut groups = BTreeMap::<&str, Vec<_>>::new();
    for row in table.rows() {
        if let Some(study) = row.get(STUDY) {
            groups.entry(study).or_default().push(row);
        }
    }
    groups
}

pub fn check_unique_ids(table: &Table) -> Result<(), QcError> {
    for (study, rows) in rows_by_study(table) {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for sample_id in rows.iter().filter_map(|row| row.get(SAMPLE_ID)) {
            if !seen.insert(sample_id) && !duplicates.iter().any(|dup| dup == sample_id) {
                duplicates.push(sample_id.to_string());
            }
        }
        if !duplicates.is_empty() {
            return Err(QcError::DuplicateSampleId {
                study: study.to_string(),
                duplicates,
            });
        }
    }
    Ok(())
}

/// Within a study, `GP2ID` and `clinical_id` must be in one-to-one
/// correspondence. Each direction is checked on the duplicated identifiers:
/// an identifier with more than one distinct partner is a conflict.
pub fn check_clinical_identity(table: &Table) -> Result<(), QcError> {
    for (study, rows) in rows_by_study(table) {
        for (identifier, partner) in [(GP2ID, CLINICAL_ID), (CLINICAL_ID, GP2ID)] {
            let mut partners = BTreeMap::<&str, BTreeSet<Option<&str>>>::new();
            for row in &rows {
                if let Some(id) = row.get(identifier) {
                    partners.entry(id).or_default().insert(row.get(partner));
                }
            }
            let problem_ids = partners
                .into_iter()
                .filter(|(_, linked)| linked.len() > 1)
                .map(|(id, _)| id.to_string())
                .collect::<Vec<_>>();
            if !problem_ids.is_empty() {
                let shown = rows
                    .iter()
                    .filter(|row| {
                        row.get(identifier)
                            .is_some_and(|id| problem_ids.iter().any(|p| p == id))
                    })
                    .map(|row| {
                        BASE_COLUMNS
                            .iter()
                            .map(|col| row.get(col).unwrap_or(""))
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .collect::<Vec<_>>();
                warn!(study, identifier, rows = ?shown, "clinical identity conflict");
                return Err(QcError::ClinicalIdentityConflict {
                    study: study.to_string(),
                    identifier: identifier.to_string(),
                    partner: partner.to_string(),
                    problem_ids,
                });
            }
        }
    }
    Ok(())
}

pub fn validate_allowed_values(table: &Table) -> Result<(), QcError> {
    for (column, vocabulary) in CONTROLLED_COLUMNS {
        let unallowed = table
            .distinct(column)
            .into_iter()
            .filter(|value| !vocabulary.allows(value))
            .collect::<Vec<_>>();
        if !unallowed.is_empty() {
            return Err(QcError::DisallowedValue {
                column: column.to_string(),
                values: unallowed,
            });
        }
    }
    Ok(())
}

pub fn validate_numeric_columns(table: &Table) -> Result<(), QcError> {
    for column in AGE_COLUMNS {
        let bad = table
            .distinct(column)
            .into_iter()
            .filter(|value| value.trim().parse::<f64>().is_err())
            .collect::<Vec<_>>();
        if !bad.is_empty() {
            return Err(QcError::NonNumericValue {
                column: column.to_string(),
                values: bad,
            });
        }
    }
    Ok(())
}

/// Distinct values of `target` per `(study, key)` group, keyed `study/key`.
fn conflicting_groups(table: &Table, key: &str, target: &str) -> Vec<String> {
    let mut groups = BTreeMap::<(Option<&str>, Option<&str>), BTreeSet<Option<&str>>>::new();
    for row in table.rows() {
        groups
            .entry((row.get(STUDY), row.get(key)))
            .or_default()
            .insert(row.get(target));
    }
    groups
        .into_iter()
        .filter(|(_, values)| values.len() > 1)
        .map(|((study, value), _)| {
            format!("{}/{}", study.unwrap_or_default(), value.unwrap_or_default())
        })
        .collect()
}

pub fn validate_specific_conditions(table: &Table) -> Result<Vec<Advisory>, QcError> {
    let arms = conflicting_groups(table, STUDY_ARM, STUDY_TYPE);
    if !arms.is_empty() {
        return Err(QcError::StudyArmTypeConflict(arms));
    }

    let diagnoses = conflicting_groups(table, DIAGNOSIS, GP2_PHENOTYPE);
    if !diagnoses.is_empty() {
        return Err(QcError::DiagnosisPhenotypeConflict(diagnoses));
    }

    let monogenic = table.filter(|row| {
        row.get(STUDY_TYPE) == Some("Monogenic") && row.get(GP2_PHENOTYPE) != Some("Control")
    });
    if !monogenic.is_empty() {
        info!("Monogenic study_type detected; checking family history completeness");
        check_missing_data(&monogenic, &[FAMILY_HISTORY_FOR_QC])?;
    }

    for (phenotype, study_type) in [("LBD", "Brain Bank"), ("Prodromal", "Prodromal")] {
        let misplaced = table.rows().any(|row| {
            row.get(GP2_PHENOTYPE) == Some(phenotype) && row.get(STUDY_TYPE) != Some(study_type)
        });
        if misplaced {
            return Err(QcError::InvalidPhenotypeForStudyType {
                phenotype: phenotype.to_string(),
                required_study_type: study_type.to_string(),
            });
        }
    }

    let mut advisories = Vec::new();
    let prodromal_controls = table
        .rows()
        .filter(|row| {
            row.get(STUDY_TYPE) == Some("Prodromal") && row.get(GP2_PHENOTYPE) == Some("Control")
        })
        .count();
    if prodromal_controls > 0 {
        warn!(
            rows = prodromal_controls,
            "Control GP2_phenotype assigned for study_type \"Prodromal\"; is it rather \"Prodromal\"?"
        );
        advisories.push(Advisory::ProdromalControl {
            rows: prodromal_controls,
        });
    }
    Ok(advisories)
}

fn summarize(table: &Table) -> Vec<GroupCount> {
    let mut counts = BTreeMap::<[&str; 4], usize>::new();
    for row in table.rows() {
        let key = [STUDY_ARM, STUDY_TYPE, DIAGNOSIS, GP2_PHENOTYPE].map(|col| row.get(col));
        if let [Some(arm), Some(kind), Some(diagnosis), Some(phenotype)] = key {
            *counts.entry([arm, kind, diagnosis, phenotype]).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|([arm, kind, diagnosis, phenotype], count)| GroupCount {
            study_arm: arm.to_string(),
            study_type: kind.to_string(),
            diagnosis: diagnosis.to_string(),
            gp2_phenotype: phenotype.to_string(),
            count,
        })
        .collect()
}
