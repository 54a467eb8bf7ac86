//! Record scanners: drive one store through a processor, sequentially or
//! through the worker pool.

use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::check::{CheckContext, Checker};
use crate::distribution::{Partitioning, QueueDistribution};
use crate::error::Result;
use crate::pool::{distribute, PoolSettings, RecordProcessor, WorkerContext};
use crate::progress::ProgressListener;
use crate::record::Record;
use crate::report::Reporter;
use crate::stats::Statistics;
use crate::store::{RecordStore, StoreAccess};

/// Runs a checker on each record and forwards its findings.
pub struct CheckingProcessor<'a, R> {
    checker: Checker<R>,
    stores: &'a StoreAccess,
    reporter: &'a dyn Reporter,
    stats: &'a Statistics,
}

impl<'a, R> CheckingProcessor<'a, R> {
    pub fn new(
        checker: Checker<R>,
        stores: &'a StoreAccess,
        reporter: &'a dyn Reporter,
        stats: &'a Statistics,
    ) -> Self {
        Self {
            checker,
            stores,
            reporter,
            stats,
        }
    }
}

impl<R> RecordProcessor<R> for CheckingProcessor<'_, R> {
    fn process(&self, record: &R, ctx: &WorkerContext<'_>) -> Result<()> {
        self.stats.record();
        let findings = (self.checker)(record, &CheckContext::new(self.stores, *ctx))?;
        if !findings.is_empty() {
            self.reporter.report_all(findings);
        }
        Ok(())
    }
}

/// How one pass walks its store.
#[derive(Clone, Copy, Debug)]
pub enum ScanMode {
    /// The calling thread processes every record.
    Sequential,
    /// Records go through the worker pool.
    Parallel {
        pool: PoolSettings,
        distribution: QueueDistribution,
        /// High id of the store whose ids are partitioned.
        partition_high_id: u64,
    },
}

/// One pass over one store.
#[derive(Clone, Copy, Debug)]
pub struct Scan {
    pub mode: ScanMode,
    pub forward: bool,
    pub warm_up: bool,
}

impl Scan {
    pub fn sequential(forward: bool) -> Self {
        Self {
            mode: ScanMode::Sequential,
            forward,
            warm_up: false,
        }
    }

    /// Runs the pass and returns the number of records read from the store.
    ///
    /// Progress is reported per record read. The store and the processor are
    /// both closed even when scanning failed; the first error wins.
    pub fn run<R, P>(
        &self,
        store: &dyn RecordStore<R>,
        cache: &CacheStore,
        processor: &P,
        progress: &dyn ProgressListener,
    ) -> Result<u64>
    where
        R: Record,
        P: RecordProcessor<R> + ?Sized,
    {
        let started = Instant::now();
        progress.started(store.high_id());
        let scanned = self.scan(store, cache, processor, progress);
        let closed = store.close().and_then(|()| processor.close());
        let result = scanned.and_then(|records| closed.map(|()| records));
        match &result {
            Ok(records) => {
                progress.done();
                debug!(
                    store = store.name(),
                    records,
                    forward = self.forward,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "check.scan.finished"
                );
            }
            Err(err) => {
                warn!(store = store.name(), error = %err, "check.scan.failed");
                progress.failed(err);
            }
        }
        result
    }

    fn scan<R, P>(
        &self,
        store: &dyn RecordStore<R>,
        cache: &CacheStore,
        processor: &P,
        progress: &dyn ProgressListener,
    ) -> Result<u64>
    where
        R: Record,
        P: RecordProcessor<R> + ?Sized,
    {
        if self.warm_up {
            warm_up(store)?;
        }
        let source = store.scan(self.forward).inspect(|record| {
            if record.is_ok() {
                progress.add(1);
            }
        });
        match self.mode {
            ScanMode::Sequential => {
                let ctx = WorkerContext::new(cache.client(), Partitioning::Shared);
                let mut records = 0;
                for record in source {
                    processor.process(&record?, &ctx)?;
                    records += 1;
                }
                Ok(records)
            }
            ScanMode::Parallel {
                pool,
                distribution,
                partition_high_id,
            } => {
                let distributor = distribution.distributor(pool.workers, partition_high_id);
                Ok(distribute(pool, cache, source, processor, distributor)?.records)
            }
        }
    }
}

/// Touches every other page of `store` so the real pass finds them cached.
pub fn warm_up<R: Record>(store: &dyn RecordStore<R>) -> Result<u64> {
    let pages = store.page_count();
    let mut touched = 0;
    for page in (0..pages).step_by(2) {
        store.touch_page(page)?;
        touched += 1;
    }
    debug!(store = store.name(), pages, touched, "check.scan.warmed_up");
    Ok(touched)
}
