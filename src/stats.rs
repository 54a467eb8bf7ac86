use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters a pass updates while it runs, reset between tasks.
///
/// Every counter is a relaxed atomic, safe to bump from any worker.
#[derive(Default)]
pub struct Statistics {
    /// In-use dense nodes seen.
    pub dense_nodes: AtomicU64,
    /// In-use sparse nodes seen.
    pub sparse_nodes: AtomicU64,
    /// Relationship chain links that pointed forward in id order.
    pub forward_links: AtomicU64,
    /// Relationship chain links that pointed backward in id order.
    pub back_links: AtomicU64,
    /// Relationship chain links that ended the chain.
    pub null_links: AtomicU64,
    /// Records handed to a processor.
    pub records: AtomicU64,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub dense_nodes: u64,
    pub sparse_nodes: u64,
    pub forward_links: u64,
    pub back_links: u64,
    pub null_links: u64,
    pub records: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, dense: bool) {
        if dense {
            self.dense_nodes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sparse_nodes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Classifies a chain link from `from` to `to`.
    pub fn link(&self, from: u64, to: u64, null: u64) {
        let counter = if to == null {
            &self.null_links
        } else if to > from {
            &self.forward_links
        } else {
            &self.back_links
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            dense_nodes: self.dense_nodes.load(Ordering::Relaxed),
            sparse_nodes: self.sparse_nodes.load(Ordering::Relaxed),
            forward_links: self.forward_links.load(Ordering::Relaxed),
            back_links: self.back_links.load(Ordering::Relaxed),
            null_links: self.null_links.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
        }
    }

    /// Takes a snapshot and zeroes every counter.
    pub fn reset(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            dense_nodes: self.dense_nodes.swap(0, Ordering::Relaxed),
            sparse_nodes: self.sparse_nodes.swap(0, Ordering::Relaxed),
            forward_links: self.forward_links.swap(0, Ordering::Relaxed),
            back_links: self.back_links.swap(0, Ordering::Relaxed),
            null_links: self.null_links.swap(0, Ordering::Relaxed),
            records: self.records.swap(0, Ordering::Relaxed),
        }
    }
}

impl StatisticsSnapshot {
    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &StatisticsSnapshot) {
        self.dense_nodes += other.dense_nodes;
        self.sparse_nodes += other.sparse_nodes;
        self.forward_links += other.forward_links;
        self.back_links += other.back_links;
        self.null_links += other.null_links;
        self.records += other.records;
    }
}
