//! Consistency checker for the record stores of an embedded graph database.
//!
//! A run walks every store in a fixed sequence of stages. Parallel stages feed
//! records through bounded per-worker queues; facts needed by later stages are
//! passed through a shared, id-addressed cache whose writes are kept race-free
//! by partitioning node ids between workers. Cross-pass aggregators detect
//! orphaned chains, miscounted totals and missing mandatory properties.
//!
//! Inconsistencies are reported as [`Finding`]s. Store and worker failures are
//! [`CheckError`]s and abort the run.

pub mod aggregate;
pub mod cache;
pub mod check;
pub mod config;
pub mod distribution;
pub mod error;
pub mod full_check;
pub mod logging;
pub mod multipass;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod record;
pub mod report;
pub mod scan;
pub mod stage;
pub mod stats;
pub mod store;
pub mod types;

pub use config::{CheckConfig, CheckFlags};
pub use error::{CheckError, Result};
pub use full_check::{CheckReport, FullCheck};
pub use report::{ConsistencySummary, Finding, Reporter, Severity};
pub use stage::CheckStage;
pub use store::StoreAccess;
pub use types::RecordType;
