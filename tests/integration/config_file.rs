#![allow(missing_docs)]

use std::fs;

use storecheck::config::{default_config_path, ConfigError};
use storecheck::{CheckConfig, CheckError, CheckFlags, FullCheck, StoreAccess};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("check.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn loaded_config_drives_a_run() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        &dir,
        r#"
[check]
threads = 2
queue_capacity = 4
records_per_pass = 16
max_reported_findings = 5

[flags]
check_indexes = false
check_label_scan_store = false
"#,
    );
    let (config, flags) = CheckConfig::load(&path).expect("load config");
    assert_eq!(config.threads, 2);
    assert_eq!(config.max_reported_findings, 5);
    assert!(config.warm_up);
    assert_eq!(
        flags,
        CheckFlags {
            check_graph: true,
            check_indexes: false,
            check_label_scan_store: false,
            check_property_owners: false,
        }
    );

    // An empty database is consistent apart from the absent counts store.
    let report = FullCheck::new(StoreAccess::in_memory(), config, flags)
        .execute()
        .expect("run");
    assert_eq!(report.summary.total_errors, 1);
    assert!(report.tasks_run.iter().all(|run| run.name != "label_scan"));
    assert!(report.tasks_run.iter().all(|run| run.name != "index_content"));
}

#[test]
fn empty_file_means_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "");
    let (config, flags) = CheckConfig::load(&path).expect("load config");
    assert_eq!(config, CheckConfig::default());
    assert_eq!(flags, CheckFlags::default());
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "[check]\nqueue_capacity = 0\n");
    let err = CheckConfig::load(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "queue_capacity",
            ..
        }
    ));
    assert_eq!(err.to_string(), "invalid queue_capacity: must be at least 1");
}

#[test]
fn malformed_toml_names_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(&dir, "[check\nthreads = two\n");
    let err = CheckConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("check.toml"));
}

#[test]
fn invalid_config_fails_the_run() {
    let config = CheckConfig {
        records_per_pass: 0,
        ..CheckConfig::default()
    };
    let err = FullCheck::new(StoreAccess::in_memory(), config, CheckFlags::default())
        .execute()
        .unwrap_err();
    assert!(matches!(
        err,
        CheckError::Config(ConfigError::Invalid {
            field: "records_per_pass",
            ..
        })
    ));
}

#[test]
fn default_path_lives_under_the_config_dir() {
    if let Some(path) = default_config_path() {
        assert!(path.ends_with("storecheck/check.toml"));
    }
}
