use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::QcError;
use crate::table::Table;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Destination for QC report files (`unmatched_ids.csv`, `inconsistency_*.csv`).
pub trait ArtifactSink {
    /// Writes `table` as CSV under `name` and returns where it went.
    fn write(&self, name: &str, table: &Table) -> Result<String, QcError>;
}

#[derive(Debug, Clone)]
pub struct DirArtifactSink {
    dir: Utf8PathBuf,
}

impl DirArtifactSink {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(name)
    }
}

impl ArtifactSink for DirArtifactSink {
    fn write(&self, name: &str, table: &Table) -> Result<String, QcError> {
        let path = self.path_for(name);
        write_csv_atomic(&path, table)?;
        Ok(path.to_string())
    }
}

/// Writes through a temp file in the destination directory, then renames.
pub fn write_csv_atomic(path: &Utf8Path, table: &Table) -> Result<(), QcError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| QcError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix("gp2qc-csv")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| QcError::Filesystem(err.to_string()))?;
    temp.write_all(table.to_csv().as_bytes())
        .map_err(|err| QcError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| QcError::Filesystem(err.to_string()))?;
    Ok(())
}
