use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QcError {
    #[error("missing columns: {0:?}")]
    #[diagnostic(help("please use the template sheet"))]
    MissingColumns(Vec<String>),

    #[error("unexpected columns: {0:?}")]
    #[diagnostic(help("please use the template sheet"))]
    UnexpectedColumns(Vec<String>),

    #[error("missing entries found in required columns: {}", .0.join(", "))]
    MissingData(Vec<String>),

    #[error("more than one study in the file: {0:?}")]
    MultipleStudies(Vec<String>),

    #[error("in study '{study}', sample_id is not unique: {duplicates:?}")]
    DuplicateSampleId {
        study: String,
        duplicates: Vec<String>,
    },

    #[error("in study '{study}', {identifier} assigned to different {partner}: {problem_ids:?}")]
    ClinicalIdentityConflict {
        study: String,
        identifier: String,
        partner: String,
        problem_ids: Vec<String>,
    },

    #[error("unallowed values detected in {column}: {values:?}")]
    DisallowedValue { column: String, values: Vec<String> },

    #[error("non-numeric values detected in {column}: {values:?}")]
    NonNumericValue { column: String, values: Vec<String> },

    #[error("the same study_arm assigned to two or more study_type: {0:?}")]
    StudyArmTypeConflict(Vec<String>),

    #[error("the same diagnosis assigned to two or more GP2_phenotype: {0:?}")]
    DiagnosisPhenotypeConflict(Vec<String>),

    #[error("GP2_phenotype {phenotype} is only allowed for study_type \"{required_study_type}\"")]
    InvalidPhenotypeForStudyType {
        phenotype: String,
        required_study_type: String,
    },

    #[error("duplicate {field} in input batch: {values:?}")]
    DuplicateKey { field: String, values: Vec<String> },

    #[error("{field} already registered in study {study}: {values:?}")]
    ConflictWithRegistry {
        study: String,
        field: String,
        values: Vec<String>,
    },

    #[error("the following {} sample IDs are not registered for {study}: {ids:?}", .ids.len())]
    UnknownSampleId { study: String, ids: Vec<String> },

    #[error("study '{0}' not found in the ID registry")]
    UnknownStudy(String),

    #[error("GP2sampleID does not start with the study name: {0:?}")]
    GlobalIdStudyMismatch(Vec<String>),

    #[error("{count} IDs are not compatible with the ID registry (see {artifact})")]
    RegistryMismatch { count: usize, artifact: String },

    #[error("paired studies {left}/{right} are inconsistent: {reason}")]
    PairedStudyMismatch {
        left: String,
        right: String,
        reason: String,
    },

    #[error("multiple finalized manifests share the batch id {0}")]
    DuplicateManifestFile(String),

    #[error("different study names detected: {0:?}")]
    MixedStudy(Vec<String>),

    #[error("more than one manifest_id in the current manifest: {0:?}")]
    MultipleCurrentManifestIds(Vec<String>),

    #[error("manifest_id out of sequence: expected {expected}, found {found}")]
    ManifestIdOutOfSequence { expected: String, found: String },

    #[error("manifest_id={found} in data is not consistent with {expected}")]
    ManifestIdMismatch { expected: String, found: String },

    #[error("manifest has no rows")]
    EmptyManifest,

    #[error("{expected} is different from the filename in the manifest: {found}")]
    FilenameMismatch { expected: String, found: String },

    #[error("staging directory {0} does not exist")]
    MissingStagingDirectory(PathBuf),

    #[error("unsupported input: {0}")]
    UnsupportedFormat(String),

    #[error("invalid manifest id: {0}")]
    InvalidManifestId(String),

    #[error("failed to parse table: {0}")]
    TableParse(String),

    #[error("failed to parse ID registry: {0}")]
    RegistryParse(String),

    #[error("missing config file gp2qc.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("object not found in store: {0}")]
    StorageNotFound(String),

    #[error("storage request failed: {0}")]
    StorageHttp(String),

    #[error("storage returned status {status}: {message}")]
    StorageStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
