//! Bounded producer/consumer pipeline feeding records to worker threads.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::cache::{CacheClient, CacheStore, FirstTouchGate};
use crate::distribution::{Distributor, Partitioning};
use crate::error::{CheckError, Result};
use crate::record::Record;

/// What a worker sees besides the record itself.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub cache: CacheClient<'a>,
    pub partitioning: Partitioning,
}

impl<'a> WorkerContext<'a> {
    pub fn new(cache: CacheClient<'a>, partitioning: Partitioning) -> Self {
        Self {
            cache,
            partitioning,
        }
    }

    /// Ordinal of this worker, equal to its cache client ordinal.
    pub fn worker(&self) -> usize {
        self.cache.ordinal()
    }

    /// Whether this worker owns `id` under the stage's partitioning.
    pub fn owns(&self, id: u64) -> bool {
        self.partitioning.owns(self.worker(), id)
    }
}

/// Per-record work done by a pass. Shared by every worker of the pass.
pub trait RecordProcessor<R>: Sync {
    fn process(&self, record: &R, ctx: &WorkerContext<'_>) -> Result<()>;

    /// Runs once after the last record of the pass.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Pool sizing.
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

/// Counters from one distribution run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Distributed {
    /// Records pulled from the source.
    pub records: u64,
    /// Queue pushes; relationships split across partitions count twice.
    pub pushes: u64,
    /// Most records observed queued at once, summed over all queues.
    pub peak_queued: usize,
}

/// Moves every record of `source` through per-worker bounded queues.
///
/// The calling thread is the producer. It blocks while a target queue is
/// full, so at most `queue_capacity * workers` records are ever queued.
/// Workers register their cache client in index order before taking records.
///
/// A source error stops production and is returned once the workers have
/// drained. Otherwise the first worker failure is returned, wrapped with the
/// worker ordinal; the other workers still drain their queues.
pub fn distribute<R, I, P>(
    settings: PoolSettings,
    cache: &CacheStore,
    source: I,
    processor: &P,
    mut distributor: Distributor,
) -> Result<Distributed>
where
    R: Record,
    I: Iterator<Item = Result<R>>,
    P: RecordProcessor<R> + ?Sized,
{
    let workers = settings.workers;
    if workers == 0 || distributor.workers() != workers {
        return Err(CheckError::invariant(format!(
            "pool of {workers} workers given a distributor for {}",
            distributor.workers()
        )));
    }
    let partitioning = distributor.partitioning();
    // Workers of an earlier pool have been joined; ordinals restart at zero.
    cache.release_clients();
    let gate = FirstTouchGate::new(workers);
    let failure: Mutex<Option<CheckError>> = Mutex::new(None);

    thread::scope(|scope| {
        let mut senders: Vec<Sender<R>> = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let (tx, rx) = bounded::<R>(settings.queue_capacity.max(1));
            senders.push(tx);
            let gate = &gate;
            let failure = &failure;
            handles.push(scope.spawn(move || {
                run_worker(
                    worker,
                    rx,
                    gate,
                    cache,
                    processor,
                    partitioning,
                    settings.poll_interval,
                    failure,
                )
            }));
        }

        let produced = produce(source, &mut distributor, &senders);
        drop(senders);

        let mut panicked = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker, "check.worker.panicked");
                if panicked.is_none() {
                    panicked = Some(worker);
                }
            }
        }

        let distributed = produced?;
        if let Some(err) = failure.lock().take() {
            return Err(err);
        }
        if let Some(worker) = panicked {
            return Err(CheckError::WorkerPanicked { worker });
        }
        debug!(
            records = distributed.records,
            pushes = distributed.pushes,
            peak_queued = distributed.peak_queued,
            "check.pool.drained"
        );
        Ok(distributed)
    })
}

fn produce<R, I>(
    source: I,
    distributor: &mut Distributor,
    senders: &[Sender<R>],
) -> Result<Distributed>
where
    R: Record,
    I: Iterator<Item = Result<R>>,
{
    let mut distributed = Distributed::default();
    for record in source {
        let record = record?;
        distributed.records += 1;
        let targets = distributor.targets(&record)?;
        if let Some((&last, rest)) = targets.split_last() {
            for &target in rest {
                push(&senders[target], record.clone(), &mut distributed);
            }
            push(&senders[last], record, &mut distributed);
        }
        let queued: usize = senders.iter().map(Sender::len).sum();
        distributed.peak_queued = distributed.peak_queued.max(queued);
    }
    Ok(distributed)
}

fn push<R>(sender: &Sender<R>, record: R, distributed: &mut Distributed) {
    // A disconnected queue means its worker died; the join reports it.
    if sender.send(record).is_ok() {
        distributed.pushes += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker<R, P>(
    worker: usize,
    queue: Receiver<R>,
    gate: &FirstTouchGate,
    cache: &CacheStore,
    processor: &P,
    partitioning: Partitioning,
    poll_interval: Duration,
    failure: &Mutex<Option<CheckError>>,
) where
    R: Record,
    P: RecordProcessor<R> + ?Sized,
{
    let client = gate.pass(worker, || cache.client());
    let ctx = WorkerContext::new(client, partitioning);
    trace!(worker, ordinal = client.ordinal(), "check.worker.started");

    let mut failed = false;
    let mut processed = 0u64;
    loop {
        let record = match queue.recv_timeout(poll_interval) {
            Ok(record) => record,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if failed {
            continue;
        }
        if let Err(err) = processor.process(&record, &ctx) {
            error!(worker, record = record.id(), error = %err, "check.worker.failed");
            failed = true;
            let mut first = failure.lock();
            if first.is_none() {
                *first = Some(CheckError::WorkerFailed {
                    worker,
                    source: Box::new(err),
                });
            }
            continue;
        }
        processed += 1;
    }
    trace!(worker, processed, "check.worker.finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SlotLayout;
    use crate::distribution::QueueDistribution;
    use crate::record::{NodeRecord, RelationshipRecord};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn settings(workers: usize, queue_capacity: usize) -> PoolSettings {
        PoolSettings {
            workers,
            queue_capacity,
            poll_interval: Duration::from_millis(1),
        }
    }

    struct Count(AtomicU64);

    impl<R: Record> RecordProcessor<R> for Count {
        fn process(&self, _record: &R, _ctx: &WorkerContext<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn every_record_is_processed_once_per_target() {
        let mut cache = CacheStore::new();
        cache.prepare_for_processing_of_single_store(100, SlotLayout::new(&[1]));
        let rels: Vec<_> = (0..50u64)
            .map(|id| Ok(RelationshipRecord::new(id, id, 99 - id, 0)))
            .collect();
        let counter = Count(AtomicU64::new(0));
        let distributed = distribute(
            settings(4, 3),
            &cache,
            rels.into_iter(),
            &counter,
            QueueDistribution::EndpointAffinity.distributor(4, 100),
        )
        .expect("distribute");
        assert_eq!(distributed.records, 50);
        assert_eq!(counter.0.load(Ordering::Relaxed), distributed.pushes);
        assert!(distributed.pushes > 50);
        assert_eq!(cache.registered_clients(), 4);
    }

    struct FailOn(u64);

    impl RecordProcessor<NodeRecord> for FailOn {
        fn process(&self, record: &NodeRecord, _ctx: &WorkerContext<'_>) -> Result<()> {
            if record.id == self.0 {
                return Err(CheckError::check("boom"));
            }
            Ok(())
        }
    }

    #[test]
    fn worker_failure_is_surfaced_after_draining() {
        let mut cache = CacheStore::new();
        cache.prepare_for_processing_of_single_store(200, SlotLayout::new(&[1]));
        let nodes = (0..200u64).map(|id| Ok(NodeRecord::new(id)));
        let err = distribute(
            settings(3, 2),
            &cache,
            nodes,
            &FailOn(17),
            QueueDistribution::RoundRobin.distributor(3, 200),
        )
        .unwrap_err();
        match err {
            CheckError::WorkerFailed { worker, source } => {
                assert_eq!(worker, 17 % 3);
                assert!(matches!(*source, CheckError::Check { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn source_error_stops_production() {
        let cache = CacheStore::new();
        let nodes = vec![
            Ok(NodeRecord::new(0)),
            Err(CheckError::store("nodes", "read failed")),
            Ok(NodeRecord::new(2)),
        ];
        let counter = Count(AtomicU64::new(0));
        let err = distribute(
            settings(2, 4),
            &cache,
            nodes.into_iter(),
            &counter,
            QueueDistribution::RoundRobin.distributor(2, 3),
        )
        .unwrap_err();
        assert!(matches!(err, CheckError::Store { .. }));
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
    }
}
