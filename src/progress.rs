//! Progress listeners notified by the scanners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::CheckError;

/// Receives progress of one task.
pub trait ProgressListener: Send + Sync {
    fn started(&self, total: u64);

    fn add(&self, n: u64);

    fn done(&self);

    fn failed(&self, error: &CheckError);
}

/// Creates one listener per planned task.
pub trait ProgressMonitorFactory: Send + Sync {
    fn listener(&self, task: &str) -> Box<dyn ProgressListener>;
}

/// Ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn started(&self, _total: u64) {}

    fn add(&self, _n: u64) {}

    fn done(&self) {}

    fn failed(&self, _error: &CheckError) {}
}

impl ProgressMonitorFactory for NoProgress {
    fn listener(&self, _task: &str) -> Box<dyn ProgressListener> {
        Box::new(NoProgress)
    }
}

/// Logs progress through `tracing` in tenths of the expected total.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgress;

impl ProgressMonitorFactory for LogProgress {
    fn listener(&self, task: &str) -> Box<dyn ProgressListener> {
        Box::new(LogListener {
            task: task.to_string(),
            total: AtomicU64::new(0),
            seen: AtomicU64::new(0),
            started: Mutex::new(None),
        })
    }
}

struct LogListener {
    task: String,
    total: AtomicU64,
    seen: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl LogListener {
    fn elapsed(&self) -> String {
        self.started
            .lock()
            .map(|start| format_duration(start.elapsed()))
            .unwrap_or_default()
    }
}

impl ProgressListener for LogListener {
    fn started(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        *self.started.lock() = Some(Instant::now());
        info!(task = %self.task, total, "check.progress.started");
    }

    fn add(&self, n: u64) {
        let before = self.seen.fetch_add(n, Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        if total < 10 {
            return;
        }
        let step = total / 10;
        if before / step != (before + n) / step {
            let percent = ((before + n).min(total) * 100) / total;
            info!(task = %self.task, percent, "check.progress");
        }
    }

    fn done(&self) {
        info!(
            task = %self.task,
            records = self.seen.load(Ordering::Relaxed),
            elapsed = %self.elapsed(),
            "check.progress.done"
        );
    }

    fn failed(&self, error: &CheckError) {
        warn!(
            task = %self.task,
            error = %error,
            elapsed = %self.elapsed(),
            "check.progress.failed"
        );
    }
}

/// One terminal progress bar per task, stacked in a shared multi-bar.
pub struct BarProgress {
    bars: MultiProgress,
    style: ProgressStyle,
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BarProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{prefix:>28} [{bar:40}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        Self {
            bars: MultiProgress::new(),
            style,
        }
    }
}

impl ProgressMonitorFactory for BarProgress {
    fn listener(&self, task: &str) -> Box<dyn ProgressListener> {
        let bar = self.bars.add(ProgressBar::new(0));
        bar.set_style(self.style.clone());
        bar.set_prefix(task.to_string());
        Box::new(BarListener {
            bar,
            start: Mutex::new(None),
        })
    }
}

struct BarListener {
    bar: ProgressBar,
    start: Mutex<Option<Instant>>,
}

impl ProgressListener for BarListener {
    fn started(&self, total: u64) {
        self.bar.set_length(total);
        *self.start.lock() = Some(Instant::now());
    }

    fn add(&self, n: u64) {
        self.bar.inc(n);
    }

    fn done(&self) {
        let elapsed = self
            .start
            .lock()
            .map(|start| format_duration(start.elapsed()))
            .unwrap_or_default();
        self.bar.finish_with_message(elapsed);
    }

    fn failed(&self, error: &CheckError) {
        self.bar.abandon_with_message(format!("failed: {error}"));
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}
