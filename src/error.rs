use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;

/// Result alias used throughout the checker.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Fatal failures of a consistency-check run.
///
/// Inconsistencies found in the store are never errors; they are
/// [`Finding`](crate::report::Finding)s handed to the reporter. Anything in this
/// enum aborts the current task and every task planned after it.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A store failed to read or close.
    #[error("store {store} failed: {message}")]
    Store {
        /// Name of the failing store.
        store: String,
        /// Description of the failure.
        message: String,
    },
    /// A record check failed in an unexpected way.
    #[error("record check failed: {message}")]
    Check {
        /// Description of the failure.
        message: String,
    },
    /// A worker returned an error while processing its queue.
    #[error("worker {worker} failed: {source}")]
    WorkerFailed {
        /// Zero-based worker ordinal.
        worker: usize,
        /// First error observed by that worker.
        #[source]
        source: Box<CheckError>,
    },
    /// A worker thread panicked.
    #[error("worker {worker} panicked")]
    WorkerPanicked {
        /// Zero-based worker ordinal.
        worker: usize,
    },
    /// A distribution policy produced an index outside the worker range.
    #[error("queue index {index} out of range for {workers} workers")]
    QueueOutOfRange {
        /// Computed queue index.
        index: usize,
        /// Number of worker queues.
        workers: usize,
    },
    /// Internal invariant violation.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// A planned task failed; wraps the cause with task context.
    #[error("task {task} ({stage}) over {store} with high id {high_id} failed: {source}")]
    TaskFailed {
        /// Task name.
        task: String,
        /// Stage the task ran in.
        stage: String,
        /// Store the task scanned.
        store: String,
        /// High id of that store.
        high_id: u64,
        /// Underlying failure.
        #[source]
        source: Box<CheckError>,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CheckError {
    pub(crate) fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        CheckError::Store {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Failure of a record check, for checkers supplied through
    /// [`RecordChecks`](crate::check::RecordChecks).
    pub fn check(message: impl Into<String>) -> Self {
        CheckError::Check {
            message: message.into(),
        }
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(message = %message, "check.invariant.violated");
        CheckError::Invariant(message)
    }
}
