#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use storecheck::cache::{CacheStore, SlotLayout};
use storecheck::distribution::{records_per_worker, QueueDistribution};
use storecheck::pool::{distribute, PoolSettings, RecordProcessor, WorkerContext};
use storecheck::record::{NodeRecord, RelationshipRecord};
use storecheck::{CheckError, Result};

fn settings(workers: usize, queue_capacity: usize) -> PoolSettings {
    PoolSettings {
        workers,
        queue_capacity,
        poll_interval: Duration::from_millis(1),
    }
}

fn node_source(count: u64) -> impl Iterator<Item = Result<NodeRecord>> {
    (0..count).map(|id| Ok(NodeRecord::new(id)))
}

/// Sleeps per record so the producer outruns the workers.
struct Slow {
    processed: AtomicU64,
}

impl RecordProcessor<NodeRecord> for Slow {
    fn process(&self, _record: &NodeRecord, _ctx: &WorkerContext<'_>) -> Result<()> {
        thread::sleep(Duration::from_micros(200));
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn producer_blocks_on_full_queues() -> Result<()> {
    let (workers, capacity) = (4, 2);
    let cache = CacheStore::new();
    let slow = Slow {
        processed: AtomicU64::new(0),
    };
    let distributed = distribute(
        settings(workers, capacity),
        &cache,
        node_source(400),
        &slow,
        QueueDistribution::RoundRobin.distributor(workers, 400),
    )?;
    assert_eq!(distributed.records, 400);
    assert_eq!(slow.processed.load(Ordering::Relaxed), 400);
    assert!(distributed.peak_queued >= 1);
    assert!(
        distributed.peak_queued <= workers * capacity,
        "peak {} exceeds bound",
        distributed.peak_queued
    );
    Ok(())
}

/// Records which worker saw which id, and any id it did not own.
#[derive(Default)]
struct Ownership {
    seen: Mutex<Vec<(usize, u64)>>,
    foreign: AtomicUsize,
}

impl RecordProcessor<NodeRecord> for Ownership {
    fn process(&self, record: &NodeRecord, ctx: &WorkerContext<'_>) -> Result<()> {
        if !ctx.owns(record.id) {
            self.foreign.fetch_add(1, Ordering::Relaxed);
        }
        self.seen.lock().push((ctx.worker(), record.id));
        Ok(())
    }
}

#[test]
fn worker_ordinals_match_their_partitions() -> Result<()> {
    let (workers, high_id) = (5, 1_000);
    let mut cache = CacheStore::new();
    cache.prepare_for_processing_of_single_store(high_id, SlotLayout::new(&[1]));
    let per_worker = records_per_worker(high_id, workers);

    // A second pool over the same cache must start from ordinal zero again.
    for _ in 0..2 {
        let ownership = Ownership::default();
        distribute(
            settings(workers, 8),
            &cache,
            node_source(high_id),
            &ownership,
            QueueDistribution::EndpointAffinity.distributor(workers, high_id),
        )?;
        assert_eq!(ownership.foreign.load(Ordering::Relaxed), 0);
        let seen = ownership.seen.into_inner();
        assert_eq!(seen.len(), high_id as usize);
        for (worker, id) in seen {
            assert_eq!(worker as u64, (id / per_worker).min(workers as u64 - 1));
        }
        assert_eq!(cache.registered_clients(), workers);
    }
    Ok(())
}

#[test]
fn relationships_reach_both_endpoint_owners() -> Result<()> {
    let mut cache = CacheStore::new();
    cache.prepare_for_processing_of_single_store(100, SlotLayout::new(&[1]));

    struct Owned(Mutex<Vec<(usize, u64)>>);

    impl RecordProcessor<RelationshipRecord> for Owned {
        fn process(&self, record: &RelationshipRecord, ctx: &WorkerContext<'_>) -> Result<()> {
            for node in record.endpoints() {
                if ctx.owns(node) {
                    self.0.lock().push((ctx.worker(), node));
                }
            }
            Ok(())
        }
    }

    let rels = vec![
        Ok(RelationshipRecord::new(0, 3, 97, 0)),
        Ok(RelationshipRecord::new(1, 10, 20, 0)),
        Ok(RelationshipRecord::new(2, 60, 60, 0)),
    ];
    let owned = Owned(Mutex::new(Vec::new()));
    let distributed = distribute(
        settings(2, 4),
        &cache,
        rels.into_iter(),
        &owned,
        QueueDistribution::EndpointAffinity.distributor(2, 100),
    )?;
    assert_eq!(distributed.records, 3);
    assert_eq!(distributed.pushes, 4);

    let mut owned = owned.0.into_inner();
    owned.sort_unstable();
    assert_eq!(owned, vec![(0, 3), (0, 10), (0, 20), (1, 60), (1, 97)]);
    Ok(())
}

struct FailEvery {
    modulus: u64,
    processed: AtomicU64,
}

impl RecordProcessor<NodeRecord> for FailEvery {
    fn process(&self, record: &NodeRecord, _ctx: &WorkerContext<'_>) -> Result<()> {
        if record.id % self.modulus == self.modulus - 1 {
            return Err(CheckError::Invariant(format!("record {} rejected", record.id)));
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn worker_failure_does_not_stall_the_producer() {
    let cache = CacheStore::new();
    let processor = FailEvery {
        modulus: 50,
        processed: AtomicU64::new(0),
    };
    // Failed workers keep draining, so a small queue cannot deadlock the producer.
    let err = distribute(
        settings(2, 1),
        &cache,
        node_source(500),
        &processor,
        QueueDistribution::RoundRobin.distributor(2, 500),
    )
    .unwrap_err();
    match err {
        CheckError::WorkerFailed { source, .. } => {
            assert!(source.to_string().contains("rejected"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(processor.processed.load(Ordering::Relaxed) >= 49);
}

#[test]
fn mismatched_distributor_is_rejected() {
    let cache = CacheStore::new();
    let processor = Slow {
        processed: AtomicU64::new(0),
    };
    let err = distribute(
        settings(3, 1),
        &cache,
        node_source(3),
        &processor,
        QueueDistribution::RoundRobin.distributor(2, 3),
    )
    .unwrap_err();
    assert!(matches!(err, CheckError::Invariant(_)));
    assert_eq!(processor.processed.load(Ordering::Relaxed), 0);
}

struct PanicOn(u64);

impl RecordProcessor<NodeRecord> for PanicOn {
    fn process(&self, record: &NodeRecord, _ctx: &WorkerContext<'_>) -> Result<()> {
        if record.id == self.0 {
            panic!("processor gave up on record {}", record.id);
        }
        Ok(())
    }
}

#[test]
fn panicking_worker_is_reported_with_its_ordinal() {
    let cache = CacheStore::new();
    // The dead worker's queue disconnects, so the producer cannot block on it.
    let err = distribute(
        settings(3, 1),
        &cache,
        node_source(300),
        &PanicOn(7),
        QueueDistribution::RoundRobin.distributor(3, 300),
    )
    .unwrap_err();
    match err {
        CheckError::WorkerPanicked { worker } => assert_eq!(worker, 7 % 3),
        other => panic!("unexpected error {other:?}"),
    }
}
