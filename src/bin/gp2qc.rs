use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use gp2qc::app::{App, LogSink, ProgressSink};
use gp2qc::config::{ConfigLoader, ResolvedConfig, StoreConfig};
use gp2qc::domain::ManifestId;
use gp2qc::error::QcError;
use gp2qc::output::{DirArtifactSink, JsonOutput, OutputMode};
use gp2qc::prompt::{Decider, FixedDecider, TerminalDecider};
use gp2qc::reconcile::{DirManifestSource, FinalizedManifest, LegacyExclusions, ManifestSource};
use gp2qc::registry::IdentityRegistry;
use gp2qc::rules::ValidateOptions;
use gp2qc::schema::SAMPLE_ID;
use gp2qc::storage::{GcsObjectStore, LocalObjectStore, ObjectStore};
use gp2qc::table::Table;

const DEFAULT_TOKEN_ENV: &str = "GCS_ACCESS_TOKEN";

#[derive(Parser)]
#[command(name = "gp2qc")]
#[command(about = "Sample manifest QC, GP2 ID registry and manifest reconciliation")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Validate a manifest against the schema and consistency rules")]
    Validate(ValidateArgs),
    #[command(about = "Register new samples in the ID registry")]
    AddSamples(FileArgs),
    #[command(about = "Remove samples of one study from the ID registry")]
    RemoveSamples(RemoveArgs),
    #[command(about = "Check manifest IDs against the ID registry")]
    CheckIds(FileArgs),
    #[command(about = "Check that PPMI-N and PPMI-G hold the same samples")]
    PairedCheck,
    #[command(about = "Combine a manifest with prior submissions and check consistency")]
    Reconcile(ReconcileArgs),
    #[command(about = "Export the ID registry as CSV")]
    ExportRegistry,
    #[command(about = "Stamp and stage a self-QC manifest into the finalized folder")]
    Finalize(FinalizeArgs),
}

#[derive(Args)]
struct FileArgs {
    file: Utf8PathBuf,
}

#[derive(Args)]
struct ValidateArgs {
    file: Utf8PathBuf,

    /// The file is a multi-study master sheet.
    #[arg(long)]
    master: bool,
}

#[derive(Args)]
struct RemoveArgs {
    #[arg(long)]
    study: Option<String>,

    #[arg(long, conflicts_with = "sample_ids")]
    file: Option<Utf8PathBuf>,

    sample_ids: Vec<String>,
}

#[derive(Args)]
struct ReconcileArgs {
    file: Utf8PathBuf,

    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,
}

#[derive(Args)]
struct FinalizeArgs {
    file: Utf8PathBuf,

    #[arg(long)]
    mid: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<QcError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &QcError) -> u8 {
    match error {
        QcError::MissingColumns(_)
        | QcError::UnexpectedColumns(_)
        | QcError::MissingData(_)
        | QcError::MultipleStudies(_)
        | QcError::DuplicateSampleId { .. }
        | QcError::ClinicalIdentityConflict { .. }
        | QcError::DisallowedValue { .. }
        | QcError::NonNumericValue { .. }
        | QcError::StudyArmTypeConflict(_)
        | QcError::DiagnosisPhenotypeConflict(_)
        | QcError::InvalidPhenotypeForStudyType { .. } => 2,
        QcError::DuplicateKey { .. }
        | QcError::ConflictWithRegistry { .. }
        | QcError::UnknownSampleId { .. }
        | QcError::UnknownStudy(_)
        | QcError::GlobalIdStudyMismatch(_)
        | QcError::RegistryMismatch { .. }
        | QcError::PairedStudyMismatch { .. } => 2,
        QcError::DuplicateManifestFile(_)
        | QcError::MixedStudy(_)
        | QcError::MultipleCurrentManifestIds(_)
        | QcError::ManifestIdOutOfSequence { .. }
        | QcError::ManifestIdMismatch { .. }
        | QcError::FilenameMismatch { .. } => 2,
        QcError::MissingConfig => 2,
        QcError::StorageNotFound(_) | QcError::StorageHttp(_) | QcError::StorageStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let location = config.registry.clone();
    match config.store.clone() {
        StoreConfig::Local { root } => {
            let store = LocalObjectStore::new(root);
            run_command(
                cli.command,
                IdentityRegistry::new(store, location),
                &config,
                output_mode,
            )
        }
        StoreConfig::Gcs {
            bucket,
            token_env,
            endpoint,
        } => {
            let token_env = token_env.unwrap_or_else(|| DEFAULT_TOKEN_ENV.to_string());
            let token = std::env::var(&token_env).ok();
            let mut store = GcsObjectStore::new(bucket, token)?;
            if let Some(endpoint) = endpoint {
                store = store.with_endpoint(endpoint);
            }
            run_command(
                cli.command,
                IdentityRegistry::new(store, location),
                &config,
                output_mode,
            )
        }
    }
}

fn run_command<S: ObjectStore>(
    command: Commands,
    registry: IdentityRegistry<S>,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let artifacts = DirArtifactSink::new(config.artifact_dir.clone());
    let app = match (&config.master_sheet, &config.finalized_root) {
        (Some(master_sheet), Some(finalized_root)) => App::new(
            registry,
            Manifests::Dir(DirManifestSource::new(
                master_sheet.clone(),
                finalized_root.clone(),
            )),
            artifacts,
        ),
        _ => App::new(registry, Manifests::Unconfigured, artifacts),
    };

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &LogSink,
    };
    let decider: Box<dyn Decider> = match output_mode {
        OutputMode::NonInteractive => Box::new(FixedDecider::new(false)),
        OutputMode::Interactive => Box::new(TerminalDecider),
    };

    match command {
        Commands::Validate(args) => {
            let table = Table::read_path(&args.file)?;
            let options = ValidateOptions {
                strict_single_study: !args.master,
            };
            let report = app.validate(&table, options, sink)?;
            emit(output_mode, &report)
        }
        Commands::AddSamples(args) => {
            let table = Table::read_path(&args.file)?;
            let result = app.add_samples(&table, sink)?;
            emit(output_mode, &result)
        }
        Commands::RemoveSamples(args) => {
            let study = match args.study {
                Some(study) => study,
                None => {
                    let studies = app.studies()?;
                    match decider.select("Study", &studies) {
                        Some(index) => studies[index].clone(),
                        None => {
                            return Err(miette::miette!(
                                "no study selected; pass --study in non-interactive mode"
                            ));
                        }
                    }
                }
            };
            let sample_ids = match args.file {
                Some(path) => Table::read_path(&path)?.distinct(SAMPLE_ID),
                None => args.sample_ids,
            };
            if sample_ids.is_empty() {
                return Err(miette::miette!("no sample ids given"));
            }
            let result = app.remove_samples(&study, &sample_ids, sink)?;
            emit(output_mode, &result)
        }
        Commands::CheckIds(args) => {
            let table = Table::read_path(&args.file)?;
            let result = app.check_ids(&table, sink)?;
            emit(output_mode, &result)?;
            if !result.is_consistent() {
                return Err(QcError::RegistryMismatch {
                    count: result.unmatched.len(),
                    artifact: result.artifact.unwrap_or_default(),
                }
                .into());
            }
            Ok(())
        }
        Commands::PairedCheck => {
            let result = app.paired_check(sink)?;
            emit(output_mode, &result)
        }
        Commands::Reconcile(args) => {
            let table = Table::read_path(&args.file)?;
            let columns = if args.columns.is_empty() {
                config.monitored_columns.clone()
            } else {
                args.columns
            };
            let exclusions = match &config.legacy_exclusions {
                Some(path) => LegacyExclusions::parse(
                    &std::fs::read_to_string(path.as_std_path()).into_diagnostic()?,
                ),
                None => LegacyExclusions::default(),
            };
            let report = app.reconcile(&table, &columns, &exclusions, sink)?;
            emit(output_mode, &report)
        }
        Commands::ExportRegistry => {
            let result = app.export_registry(sink)?;
            emit(output_mode, &result)
        }
        Commands::Finalize(args) => {
            let root = config
                .finalized_root
                .as_ref()
                .ok_or_else(|| {
                    QcError::ConfigParse("finalized_root is not configured".to_string())
                })?;
            let mid = args.mid.parse::<ManifestId>()?;
            let table = Table::read_path(&args.file)?;
            let file_name = args.file.file_name().unwrap_or(args.file.as_str());
            let result = app.finalize(file_name, mid, table, root, decider.as_ref(), sink)?;
            emit(output_mode, &result)
        }
    }
}

fn emit<T: Serialize>(output_mode: OutputMode, value: &T) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Interactive => {
            let text = serde_json::to_string_pretty(value).into_diagnostic()?;
            println!("{text}");
            Ok(())
        }
    }
}

/// History source for `reconcile`; other commands run without one.
enum Manifests {
    Dir(DirManifestSource),
    Unconfigured,
}

impl Manifests {
    fn unconfigured() -> QcError {
        QcError::ConfigParse("master_sheet and finalized_root must be configured".to_string())
    }
}

impl ManifestSource for Manifests {
    fn master_sheet(&self) -> Result<Table, QcError> {
        match self {
            Manifests::Dir(source) => source.master_sheet(),
            Manifests::Unconfigured => Err(Self::unconfigured()),
        }
    }

    fn finalized(&self, study: &str) -> Result<Vec<FinalizedManifest>, QcError> {
        match self {
            Manifests::Dir(source) => source.finalized(study),
            Manifests::Unconfigured => Err(Self::unconfigured()),
        }
    }
}
