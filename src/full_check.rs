//! Entry point of a full consistency check.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::aggregate::MandatoryProperties;
use crate::check::RecordChecks;
use crate::config::{CheckConfig, CheckFlags};
use crate::error::Result;
use crate::plan::{plan, Executor, SharedState, TaskRun};
use crate::progress::{NoProgress, ProgressMonitorFactory};
use crate::record::SchemaRecord;
use crate::report::{CollectingReporter, ConsistencySummary, Finding, Reporter};
use crate::stats::StatisticsSnapshot;
use crate::store::StoreAccess;

/// Outcome of a completed run.
#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    pub summary: ConsistencySummary,
    /// Retained findings, ordered by record type and id.
    pub findings: Vec<Finding>,
    /// Findings counted but not retained.
    pub dropped_findings: u64,
    /// Statistics summed over every task.
    pub statistics: StatisticsSnapshot,
    pub tasks_run: Vec<TaskRun>,
}

impl CheckReport {
    pub fn is_consistent(&self) -> bool {
        self.summary.is_consistent()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Checks every store of a database.
///
/// ```ignore
/// let report = FullCheck::new(stores, CheckConfig::default(), CheckFlags::default())
///     .with_progress(Arc::new(LogProgress))
///     .execute()?;
/// assert!(report.is_consistent());
/// ```
pub struct FullCheck {
    stores: StoreAccess,
    config: CheckConfig,
    flags: CheckFlags,
    checks: RecordChecks,
    progress: Arc<dyn ProgressMonitorFactory>,
    forward_to: Option<Arc<dyn Reporter>>,
}

impl FullCheck {
    pub fn new(stores: StoreAccess, config: CheckConfig, flags: CheckFlags) -> Self {
        Self {
            stores,
            config,
            flags,
            checks: RecordChecks::default(),
            progress: Arc::new(NoProgress),
            forward_to: None,
        }
    }

    /// Replaces the base record checks.
    pub fn with_checks(mut self, checks: RecordChecks) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressMonitorFactory>) -> Self {
        self.progress = progress;
        self
    }

    /// Also hands every finding to `reporter` as it is found.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.forward_to = Some(reporter);
        self
    }

    /// Runs every planned task.
    ///
    /// Returns an error when any task failed; a partial report is never
    /// returned.
    pub fn execute(&self) -> Result<CheckReport> {
        self.config.validate()?;
        let started = Instant::now();
        let mandatory = self.mandatory_properties()?;
        let shared = SharedState::new(&self.stores, mandatory);
        let collecting = CollectingReporter::new(self.config.max_reported_findings);
        let forwarding = Forwarding {
            collecting: &collecting,
            forward_to: self.forward_to.as_deref(),
        };
        let tasks = plan(&self.flags);
        info!(
            tasks = tasks.len(),
            threads = self.config.threads,
            flags = ?self.flags,
            "check.run.start"
        );

        let executor = Executor {
            stores: &self.stores,
            config: &self.config,
            flags: self.flags,
            checks: &self.checks,
            reporter: &forwarding,
            progress: self.progress.as_ref(),
            shared: &shared,
        };
        let tasks_run = executor.execute(&tasks)?;

        let mut statistics = StatisticsSnapshot::default();
        for run in &tasks_run {
            statistics.merge(&run.statistics);
        }
        let (summary, findings, dropped_findings) = collecting.take();
        info!(
            errors = summary.total_errors,
            warnings = summary.total_warnings,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "check.run.finish"
        );
        Ok(CheckReport {
            summary,
            findings,
            dropped_findings,
            statistics,
            tasks_run,
        })
    }

    /// Existence constraints, read from the schema store before any task runs.
    fn mandatory_properties(&self) -> Result<MandatoryProperties> {
        let mut rules = Vec::new();
        for record in self.stores.schema.scan(true) {
            let record: SchemaRecord = record?;
            if record.in_use {
                rules.extend(record.rule);
            }
        }
        Ok(MandatoryProperties::from_rules(&rules))
    }
}

struct Forwarding<'a> {
    collecting: &'a CollectingReporter,
    forward_to: Option<&'a dyn Reporter>,
}

impl Reporter for Forwarding<'_> {
    fn report(&self, finding: Finding) {
        if let Some(reporter) = self.forward_to {
            reporter.report(finding.clone());
        }
        self.collecting.report(finding);
    }
}
