//! Routing of records to worker queues.

use smallvec::{smallvec, SmallVec};

use crate::error::{CheckError, Result};
use crate::record::Record;

/// Worker queue indexes picked for one record.
pub type Targets = SmallVec<[usize; 2]>;

/// How a stage spreads records over its workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueDistribution {
    /// Next worker in turn; no locality.
    RoundRobin,
    /// Worker owning the id range of each natural id.
    EndpointAffinity,
}

impl QueueDistribution {
    /// Builds the routing state for one run over ids `0..high_id`.
    ///
    /// For endpoint affinity `high_id` is that of the store whose ids are
    /// partitioned, i.e. the node store for relationship passes.
    pub fn distributor(self, workers: usize, high_id: u64) -> Distributor {
        match self {
            QueueDistribution::RoundRobin => Distributor::RoundRobin { workers, next: 0 },
            QueueDistribution::EndpointAffinity => Distributor::EndpointAffinity {
                workers,
                records_per_worker: records_per_worker(high_id, workers),
            },
        }
    }
}

/// Size of each worker's contiguous id range: `ceil(high_id / workers)`, at least one.
pub fn records_per_worker(high_id: u64, workers: usize) -> u64 {
    let workers = workers.max(1) as u64;
    high_id.div_ceil(workers).max(1)
}

/// Routing state held by the producer thread.
#[derive(Debug)]
pub enum Distributor {
    RoundRobin { workers: usize, next: usize },
    EndpointAffinity { workers: usize, records_per_worker: u64 },
}

impl Distributor {
    pub fn workers(&self) -> usize {
        match *self {
            Distributor::RoundRobin { workers, .. } => workers,
            Distributor::EndpointAffinity { workers, .. } => workers,
        }
    }

    /// Queue indexes `record` must be pushed to, deduplicated.
    pub fn targets<R: Record>(&mut self, record: &R) -> Result<Targets> {
        match self {
            Distributor::RoundRobin { workers, next } => {
                let index = *next;
                *next = (*next + 1) % (*workers).max(1);
                Ok(smallvec![checked(index, *workers)?])
            }
            Distributor::EndpointAffinity {
                workers,
                records_per_worker,
            } => {
                let mut targets = Targets::new();
                for id in record.natural_ids() {
                    let index = checked(partition(id, *records_per_worker, *workers), *workers)?;
                    if !targets.contains(&index) {
                        targets.push(index);
                    }
                }
                Ok(targets)
            }
        }
    }

    /// Id ownership implied by this distributor, shared with the workers.
    pub fn partitioning(&self) -> Partitioning {
        match *self {
            Distributor::RoundRobin { .. } => Partitioning::Shared,
            Distributor::EndpointAffinity {
                workers,
                records_per_worker,
            } => Partitioning::Ranges {
                workers,
                records_per_worker,
            },
        }
    }
}

/// Which worker owns which ids during a stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Partitioning {
    /// No ownership; any worker may see any id.
    Shared,
    Ranges { workers: usize, records_per_worker: u64 },
}

impl Partitioning {
    /// Whether `worker` owns `id`. Always true when ids are shared.
    pub fn owns(&self, worker: usize, id: u64) -> bool {
        match *self {
            Partitioning::Shared => true,
            Partitioning::Ranges {
                workers,
                records_per_worker,
            } => partition(id, records_per_worker, workers) == worker,
        }
    }
}

/// Worker owning `id`. Ids beyond the partitioned range fall to the last worker.
pub fn partition(id: u64, records_per_worker: u64, workers: usize) -> usize {
    let raw = id / records_per_worker.max(1);
    raw.min(workers.saturating_sub(1) as u64) as usize
}

fn checked(index: usize, workers: usize) -> Result<usize> {
    if index < workers {
        Ok(index)
    } else {
        Err(CheckError::QueueOutOfRange { index, workers })
    }
}
