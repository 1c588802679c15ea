use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::QcError;
use crate::registry::RegistryLocation;
use crate::schema::DEFAULT_MONITORED_COLUMNS;

const CONFIG_FILE: &str = "gp2qc.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub registry_key: Option<String>,
    #[serde(default)]
    pub archive_prefix: Option<String>,
    #[serde(default)]
    pub backup_stem: Option<String>,
    #[serde(default)]
    pub master_sheet: Option<String>,
    #[serde(default)]
    pub finalized_root: Option<String>,
    #[serde(default)]
    pub legacy_exclusions: Option<String>,
    #[serde(default)]
    pub monitored_columns: Option<Vec<String>>,
    #[serde(default)]
    pub artifact_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    Local {
        root: String,
    },
    Gcs {
        bucket: String,
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: StoreConfig,
    pub registry: RegistryLocation,
    pub master_sheet: Option<Utf8PathBuf>,
    pub finalized_root: Option<Utf8PathBuf>,
    pub legacy_exclusions: Option<Utf8PathBuf>,
    pub monitored_columns: Vec<String>,
    pub artifact_dir: Utf8PathBuf,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Uses `path`, else `./gp2qc.json`, else the user config directory.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, QcError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_paths()
                .into_iter()
                .find(|candidate| candidate.exists())
                .ok_or(QcError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| QcError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| QcError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dirs) = BaseDirs::new() {
            paths.push(dirs.config_dir().join("gp2qc").join(CONFIG_FILE));
        }
        paths
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, QcError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = RegistryLocation::default();

        let store = config.store.unwrap_or(StoreConfig::Local {
            root: ".".to_string(),
        });
        if let StoreConfig::Gcs { bucket, .. } = &store {
            if bucket.trim().is_empty() {
                return Err(QcError::ConfigParse("gcs store requires a bucket".to_string()));
            }
        }

        let monitored_columns = match config.monitored_columns {
            Some(columns) if columns.is_empty() => {
                return Err(QcError::ConfigParse(
                    "monitored_columns must not be empty".to_string(),
                ));
            }
            Some(columns) => columns,
            None => default_monitored_columns(),
        };

        Ok(ResolvedConfig {
            schema_version,
            store,
            registry: RegistryLocation {
                key: config.registry_key.unwrap_or(defaults.key),
                archive_prefix: config.archive_prefix.unwrap_or(defaults.archive_prefix),
                backup_stem: config.backup_stem.unwrap_or(defaults.backup_stem),
            },
            master_sheet: config.master_sheet.map(Utf8PathBuf::from),
            finalized_root: config.finalized_root.map(Utf8PathBuf::from),
            legacy_exclusions: config.legacy_exclusions.map(Utf8PathBuf::from),
            monitored_columns,
            artifact_dir: Utf8PathBuf::from(config.artifact_dir.unwrap_or_else(|| ".".to_string())),
        })
    }
}

pub fn default_monitored_columns() -> Vec<String> {
    DEFAULT_MONITORED_COLUMNS
        .iter()
        .map(|col| col.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.registry, RegistryLocation::default());
        assert_eq!(resolved.monitored_columns, default_monitored_columns());
        assert_eq!(
            resolved.store,
            StoreConfig::Local {
                root: ".".to_string()
            }
        );
    }
}
