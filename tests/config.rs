use std::fs;

use assert_matches::assert_matches;

use gp2qc::config::{Config, ConfigLoader, StoreConfig};
use gp2qc::error::QcError;

#[test]
fn parse_gcs_config() {
    let config: Config = serde_json::from_str(
        r#"{
            "store": {"kind": "gcs", "bucket": "eu-samplemanifest", "token_env": "GP2_TOKEN"},
            "master_sheet": "/data/master.csv",
            "monitored_columns": ["race_for_qc"]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(
        resolved.store,
        StoreConfig::Gcs {
            bucket: "eu-samplemanifest".to_string(),
            token_env: Some("GP2_TOKEN".to_string()),
            endpoint: None,
        }
    );
    assert_eq!(resolved.registry.key, "IDSTRACKER/GP2IDSMAPPER.json");
    assert_eq!(resolved.monitored_columns, vec!["race_for_qc".to_string()]);
    assert_eq!(resolved.master_sheet.as_deref().map(|p| p.as_str()), Some("/data/master.csv"));
    assert_eq!(resolved.artifact_dir.as_str(), ".");
}

#[test]
fn resolve_reads_explicit_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("gp2qc.json");
    fs::write(
        &path,
        r#"{"store": {"kind": "local", "root": "/srv/registry"}, "archive_prefix": "IDSTRACKER/OLD"}"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();

    assert_eq!(
        resolved.store,
        StoreConfig::Local {
            root: "/srv/registry".to_string()
        }
    );
    assert_eq!(resolved.registry.archive_prefix, "IDSTRACKER/OLD");
    assert_eq!(resolved.registry.backup_stem, "GP2IDSMAPPER");
}

#[test]
fn invalid_configs() {
    let empty_columns: Config = serde_json::from_str(r#"{"monitored_columns": []}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(empty_columns),
        Err(QcError::ConfigParse(_))
    );

    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(QcError::ConfigRead(_))
    );

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(broken.to_str()),
        Err(QcError::ConfigParse(_))
    );
}
