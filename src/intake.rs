use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::ManifestId;
use crate::error::QcError;
use crate::output::write_csv_atomic;
use crate::prompt::Decider;
use crate::rules::{self, ValidateOptions};
use crate::schema::{FILENAME, MANIFEST_ID, STUDY};
use crate::table::Table;

static SELF_QC_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_selfQCV(\d+)_").unwrap());

/// A submitted manifest with `manifest_id` and `filename` settled.
#[derive(Debug, Clone)]
pub struct PreparedManifest {
    pub save_name: String,
    pub manifest_id: ManifestId,
    pub table: Table,
}

impl PreparedManifest {
    pub fn study(&self) -> Result<String, QcError> {
        match self.table.distinct(STUDY).as_slice() {
            [] => Err(QcError::MissingData(vec![STUDY.to_string()])),
            [study] => Ok(study.clone()),
            studies => Err(QcError::MultipleStudies(studies.to_vec())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "path", rename_all = "snake_case")]
pub enum StageOutcome {
    Written(Utf8PathBuf),
    Skipped,
}

/// V2 self-QC files must already carry `mid`; V3 files are stamped with it.
pub fn prepare_submission(
    file_name: &str,
    mid: ManifestId,
    table: Table,
) -> Result<PreparedManifest, QcError> {
    let base = Utf8Path::new(file_name)
        .file_name()
        .unwrap_or(file_name);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };

    let version = SELF_QC_VERSION
        .captures(base)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str());

    let mut table = table;
    let save_name = if version == Some("2") {
        let found = table.distinct(MANIFEST_ID);
        if found.len() != 1 || found[0] != mid.to_string() {
            return Err(QcError::ManifestIdMismatch {
                expected: mid.to_string(),
                found: found.join(", "),
            });
        }
        format!("{stem}.csv")
    } else if version == Some("3") {
        table.set_column(MANIFEST_ID, Some(&mid.to_string()));
        format!("{stem}_{mid}.csv")
    } else {
        return Err(QcError::UnsupportedFormat(format!(
            "{base} is neither a selfQCV2 nor a selfQCV3 manifest"
        )));
    };

    table.set_column(FILENAME, Some(&save_name));
    info!(file = %save_name, rows = table.len(), "manifest loaded");
    Ok(PreparedManifest {
        save_name,
        manifest_id: mid,
        table,
    })
}

/// Validates `prepared` and writes it to `{root}/{study}/{save_name}`.
pub fn stage_finalized(
    prepared: &PreparedManifest,
    root: &Utf8Path,
    decider: &dyn Decider,
) -> Result<StageOutcome, QcError> {
    rules::validate(&prepared.table, ValidateOptions::default())?;

    let names = prepared.table.distinct(FILENAME);
    match names.as_slice() {
        [] => return Err(QcError::MissingData(vec![FILENAME.to_string()])),
        [name] if *name == prepared.save_name => {}
        _ => {
            return Err(QcError::FilenameMismatch {
                expected: prepared.save_name.clone(),
                found: names.join(", "),
            });
        }
    }

    let dir = root.join(prepared.study()?);
    if !dir.as_std_path().is_dir() {
        return Err(QcError::MissingStagingDirectory(dir.into_std_path_buf()));
    }

    let path = dir.join(&prepared.save_name);
    if path.as_std_path().exists() {
        let question = format!(
            "The file {} already exists. Do you want to overwrite it?",
            prepared.save_name
        );
        if !decider.confirm(&question) {
            warn!(path = %path, "file not overwritten");
            return Ok(StageOutcome::Skipped);
        }
    }

    write_csv_atomic(&path, &prepared.table)?;
    info!(path = %path, "finalized manifest saved");
    Ok(StageOutcome::Written(path))
}
