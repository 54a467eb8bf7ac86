//! Fresh node and relationship counts, diffed once against the counts store.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::error::{CheckError, Result};
use crate::store::CountsStore;
use crate::types::{LabelId, RelTypeId};

use super::Sharded;

/// Token value standing for "any label" or "any type".
pub const WILDCARD: u32 = u32::MAX;

/// Key of one persisted count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountsKey {
    Node {
        label: u32,
    },
    Relationship {
        start_label: u32,
        rel_type: u32,
        end_label: u32,
    },
}

impl CountsKey {
    pub fn node(label: u32) -> Self {
        CountsKey::Node { label }
    }

    pub fn relationship(start_label: u32, rel_type: u32, end_label: u32) -> Self {
        CountsKey::Relationship {
            start_label,
            rel_type,
            end_label,
        }
    }
}

fn token(value: u32) -> String {
    if value == WILDCARD {
        "*".to_string()
    } else {
        value.to_string()
    }
}

impl fmt::Display for CountsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CountsKey::Node { label } => write!(f, "(:{})", token(label)),
            CountsKey::Relationship {
                start_label,
                rel_type,
                end_label,
            } => write!(
                f,
                "(:{})-[:{}]->(:{})",
                token(start_label),
                token(rel_type),
                token(end_label)
            ),
        }
    }
}

/// A key whose fresh total differs from the persisted one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CountsMismatch {
    pub key: CountsKey,
    pub expected: u64,
    pub persisted: u64,
}

/// Result of diffing the accumulator against the counts store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CountsReconciliation {
    /// The store was readable; every differing key is listed.
    Checked(Vec<CountsMismatch>),
    /// The store is missing or unreadable; nothing was compared.
    StoreUnavailable(String),
}

/// Concurrent running totals keyed by [`CountsKey`].
///
/// Totals are global, so every worker writes here regardless of partition.
/// The map is sharded by key hash to keep contention down.
pub struct CountsAccumulator {
    totals: Sharded<CountsKey, u64>,
    reconciled: AtomicBool,
}

impl Default for CountsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl CountsAccumulator {
    pub fn new() -> Self {
        Self {
            totals: Sharded::new(),
            reconciled: AtomicBool::new(false),
        }
    }

    pub fn increment(&self, key: CountsKey, by: u64) {
        self.totals.with(&key, |shard| *shard.entry(key).or_insert(0) += by);
    }

    /// Counts one in-use node under the wildcard and each of its labels.
    pub fn accumulate_node(&self, labels: &[LabelId]) {
        self.increment(CountsKey::node(WILDCARD), 1);
        for label in distinct(labels) {
            self.increment(CountsKey::node(label.0), 1);
        }
    }

    /// Counts one in-use relationship under every key shape the counts store keeps.
    pub fn accumulate_relationship(
        &self,
        rel_type: RelTypeId,
        start_labels: &[LabelId],
        end_labels: &[LabelId],
    ) {
        let t = rel_type.0;
        self.increment(CountsKey::relationship(WILDCARD, WILDCARD, WILDCARD), 1);
        self.increment(CountsKey::relationship(WILDCARD, t, WILDCARD), 1);
        for label in distinct(start_labels) {
            self.increment(CountsKey::relationship(label.0, WILDCARD, WILDCARD), 1);
            self.increment(CountsKey::relationship(label.0, t, WILDCARD), 1);
        }
        for label in distinct(end_labels) {
            self.increment(CountsKey::relationship(WILDCARD, WILDCARD, label.0), 1);
            self.increment(CountsKey::relationship(WILDCARD, t, label.0), 1);
        }
    }

    /// Current total for `key`.
    pub fn get(&self, key: &CountsKey) -> u64 {
        self.totals
            .with(key, |shard| shard.get(key).copied().unwrap_or(0))
    }

    /// Diffs the totals against `persisted`, consuming them.
    ///
    /// Each persisted entry removes its key from the running totals; totals
    /// that were never matched are compared against zero. Calling this twice
    /// is an invariant violation.
    pub fn reconcile(&self, persisted: Option<&dyn CountsStore>) -> Result<CountsReconciliation> {
        if self.reconciled.swap(true, Ordering::AcqRel) {
            return Err(CheckError::invariant("counts reconciled more than once"));
        }
        let Some(store) = persisted else {
            warn!("check.counts.missing");
            return Ok(CountsReconciliation::StoreUnavailable(
                "counts store is missing".to_string(),
            ));
        };
        let entries = match store.entries() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "check.counts.unreadable");
                return Ok(CountsReconciliation::StoreUnavailable(err.to_string()));
            }
        };

        let mut fresh: FxHashMap<CountsKey, u64> = self.totals.drain();
        let mut mismatches = BTreeMap::new();
        for (key, persisted) in entries {
            let expected = fresh.remove(&key).unwrap_or(0);
            if expected != persisted {
                mismatches.insert(key, (expected, persisted));
            }
        }
        for (key, expected) in fresh {
            if expected != 0 {
                mismatches.insert(key, (expected, 0));
            }
        }
        debug!(mismatches = mismatches.len(), "check.counts.reconciled");
        Ok(CountsReconciliation::Checked(
            mismatches
                .into_iter()
                .map(|(key, (expected, persisted))| CountsMismatch {
                    key,
                    expected,
                    persisted,
                })
                .collect(),
        ))
    }
}

fn distinct(labels: &[LabelId]) -> SmallVec<[LabelId; 4]> {
    let mut out: SmallVec<[LabelId; 4]> = labels.iter().copied().collect();
    out.sort_unstable();
    out.dedup();
    out
}
