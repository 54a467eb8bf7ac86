//! Findings, the reporter sink and the consistency summary.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::RecordType;

/// How serious an inconsistency is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One inconsistency found in a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub record_type: RecordType,
    pub id: u64,
    pub message: String,
}

impl Finding {
    pub fn error(record_type: RecordType, id: u64, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            record_type,
            id,
            message: message.into(),
        }
    }

    pub fn warning(record_type: RecordType, id: u64, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            record_type,
            id,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        write!(f, "{level} {}[{}]: {}", self.record_type, self.id, self.message)
    }
}

/// Sink for findings. Called concurrently from every worker.
pub trait Reporter: Send + Sync {
    fn report(&self, finding: Finding);

    fn report_all(&self, findings: Vec<Finding>) {
        for finding in findings {
            self.report(finding);
        }
    }
}

/// Error and warning totals for one record type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
    pub errors: u64,
    pub warnings: u64,
}

/// Inconsistency totals per record type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencySummary {
    pub by_type: BTreeMap<RecordType, TypeCounts>,
    pub total_errors: u64,
    pub total_warnings: u64,
}

impl ConsistencySummary {
    pub fn add(&mut self, finding: &Finding) {
        let counts = self.by_type.entry(finding.record_type).or_default();
        match finding.severity {
            Severity::Error => {
                counts.errors += 1;
                self.total_errors += 1;
            }
            Severity::Warning => {
                counts.warnings += 1;
                self.total_warnings += 1;
            }
        }
    }

    /// No errors were found. Warnings do not count against consistency.
    pub fn is_consistent(&self) -> bool {
        self.total_errors == 0
    }

    pub fn errors_for(&self, record_type: RecordType) -> u64 {
        self.by_type
            .get(&record_type)
            .map(|counts| counts.errors)
            .unwrap_or(0)
    }

    pub fn warnings_for(&self, record_type: RecordType) -> u64 {
        self.by_type
            .get(&record_type)
            .map(|counts| counts.warnings)
            .unwrap_or(0)
    }
}

impl fmt::Display for ConsistencySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_consistent() && self.total_warnings == 0 {
            return write!(f, "consistency check found no inconsistencies");
        }
        writeln!(
            f,
            "consistency check found {} errors and {} warnings",
            self.total_errors, self.total_warnings
        )?;
        for (record_type, counts) in &self.by_type {
            writeln!(
                f,
                "  {record_type}: {} errors, {} warnings",
                counts.errors, counts.warnings
            )?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct Collected {
    summary: ConsistencySummary,
    findings: Vec<Finding>,
    dropped: u64,
}

/// Reporter that keeps a summary and up to `max_retained` findings.
pub struct CollectingReporter {
    max_retained: usize,
    collected: Mutex<Collected>,
}

impl CollectingReporter {
    pub fn new(max_retained: usize) -> Self {
        Self {
            max_retained,
            collected: Mutex::new(Collected::default()),
        }
    }

    pub fn summary(&self) -> ConsistencySummary {
        self.collected.lock().summary.clone()
    }

    /// Retained findings ordered by record type, id and message.
    pub fn findings(&self) -> Vec<Finding> {
        let mut findings = self.collected.lock().findings.clone();
        findings.sort_by(|a, b| {
            (a.record_type, a.id, &a.message).cmp(&(b.record_type, b.id, &b.message))
        });
        findings
    }

    /// Findings counted in the summary but not retained.
    pub fn dropped(&self) -> u64 {
        self.collected.lock().dropped
    }

    /// Takes the summary and retained findings, leaving the reporter empty.
    pub fn take(&self) -> (ConsistencySummary, Vec<Finding>, u64) {
        let collected = std::mem::take(&mut *self.collected.lock());
        let mut findings = collected.findings;
        findings.sort_by(|a, b| {
            (a.record_type, a.id, &a.message).cmp(&(b.record_type, b.id, &b.message))
        });
        (collected.summary, findings, collected.dropped)
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, finding: Finding) {
        debug!(
            record_type = %finding.record_type,
            id = finding.id,
            message = %finding.message,
            "check.finding"
        );
        let mut collected = self.collected.lock();
        collected.summary.add(&finding);
        if collected.findings.len() < self.max_retained {
            collected.findings.push(finding);
        } else {
            if collected.dropped == 0 {
                warn!(max = self.max_retained, "check.findings.truncated");
            }
            collected.dropped += 1;
        }
    }
}
