use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_RECORDS_PER_PASS: u64 = 1_000_000;
const DEFAULT_MAX_REPORTED_FINDINGS: usize = 10_000;

/// Tuning knobs of a consistency-check run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Number of worker threads used by parallel stages.
    pub threads: usize,
    /// Capacity of each worker's record queue.
    pub queue_capacity: usize,
    /// How long an idle worker waits on its queue before re-checking for shutdown.
    pub poll_interval_ms: u64,
    /// Width of the id window resolved by one filtered pass.
    pub records_per_pass: u64,
    /// Touch store pages before scanning them.
    pub warm_up: bool,
    /// Findings retained in the report; later ones are only counted.
    pub max_reported_findings: usize,
    /// Log per-task statistics at info level.
    pub verbose: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            records_per_pass: DEFAULT_RECORDS_PER_PASS,
            warm_up: true,
            max_reported_findings: DEFAULT_MAX_REPORTED_FINDINGS,
            verbose: false,
        }
    }
}

/// One thread fewer than the machine offers, never less than one.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

impl CheckConfig {
    /// Returns a copy using `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Returns a copy with the given queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Returns a copy with the given multi-pass window.
    pub fn with_records_per_pass(mut self, records: u64) -> Self {
        self.records_per_pass = records;
        self
    }

    /// Returns a copy with page warm-up switched on or off.
    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Rejects values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid {
                field: "threads",
                reason: "must be at least 1",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1",
            });
        }
        if self.records_per_pass == 0 {
            return Err(ConfigError::Invalid {
                field: "records_per_pass",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    /// Loads `[check]` and `[flags]` from a TOML file.
    pub fn load(path: &Path) -> Result<(CheckConfig, CheckFlags), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.check.validate()?;
        Ok((file.check, file.flags))
    }

    /// Parses a TOML document holding only the `[check]` table contents.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CheckConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Subsystems a run checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckFlags {
    /// Node, relationship, group, property, dynamic and token stores.
    pub check_graph: bool,
    /// Schema index structure and content.
    pub check_indexes: bool,
    /// Label and relationship-type scan stores.
    pub check_label_scan_store: bool,
    /// Property chain ownership (orphans and shared chains).
    pub check_property_owners: bool,
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self {
            check_graph: true,
            check_indexes: true,
            check_label_scan_store: true,
            check_property_owners: false,
        }
    }
}

impl CheckFlags {
    /// Every subsystem switched on.
    pub fn all() -> Self {
        Self {
            check_graph: true,
            check_indexes: true,
            check_label_scan_store: true,
            check_property_owners: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    check: CheckConfig,
    flags: CheckFlags,
}

/// Default location of the checker config file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("storecheck").join("check.toml"))
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read check config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse check config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
