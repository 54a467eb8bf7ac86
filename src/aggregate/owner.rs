//! Chain ownership: who points at a chain head, and which heads nobody claims.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::error::{CheckError, Result};
use crate::record::TokenKind;
use crate::types::RecordType;

use super::Sharded;

/// Record that references a chain head.
///
/// Claimants order by record type, then id. The lowest claimant of a shared
/// chain is taken as its owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Claimant {
    pub record_type: RecordType,
    pub id: u64,
}

impl Claimant {
    pub fn new(record_type: RecordType, id: u64) -> Self {
        Self { record_type, id }
    }
}

impl fmt::Display for Claimant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.record_type, self.id)
    }
}

/// Two records claiming the same chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    /// Claimant kept as the owner.
    pub owner: Claimant,
    /// Claimant that shares a chain it does not own.
    pub other: Claimant,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Owner {
    /// The chain record exists but nothing has claimed it yet.
    Unknown,
    Claimed(Claimant),
}

/// Store whose chains a tracker watches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerDomain {
    Property,
    String,
    Array,
    LabelName,
    RelationshipTypeName,
    PropertyKeyName,
}

impl OwnerDomain {
    pub const ALL: [OwnerDomain; 6] = [
        OwnerDomain::Property,
        OwnerDomain::String,
        OwnerDomain::Array,
        OwnerDomain::LabelName,
        OwnerDomain::RelationshipTypeName,
        OwnerDomain::PropertyKeyName,
    ];

    /// Domain of the name chains of `kind` tokens.
    pub fn names_of(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Label => OwnerDomain::LabelName,
            TokenKind::RelationshipType => OwnerDomain::RelationshipTypeName,
            TokenKind::PropertyKey => OwnerDomain::PropertyKeyName,
        }
    }

    /// Record type orphans of this domain are reported against.
    pub fn record_type(self) -> RecordType {
        match self {
            OwnerDomain::Property => RecordType::Property,
            OwnerDomain::String => RecordType::StringProperty,
            OwnerDomain::Array => RecordType::ArrayProperty,
            OwnerDomain::LabelName => RecordType::LabelName,
            OwnerDomain::RelationshipTypeName => RecordType::RelationshipTypeName,
            OwnerDomain::PropertyKeyName => RecordType::PropertyKeyName,
        }
    }
}

/// Tracks claims on the chain records of one domain.
///
/// Chain records register themselves with [`observe_head`]; referencing
/// records claim their target with [`observe`]. A second, different claim on
/// the same id is a conflict, resolved in favour of the lower claimant
/// whatever order the claims arrive in. Ids that stay unclaimed until
/// [`finalize`] are orphan candidates.
///
/// [`observe_head`]: OwnerTracker::observe_head
/// [`observe`]: OwnerTracker::observe
/// [`finalize`]: OwnerTracker::finalize
pub struct OwnerTracker {
    domain: OwnerDomain,
    owners: Sharded<u64, Owner>,
    finalized: AtomicBool,
}

impl OwnerTracker {
    pub fn new(domain: OwnerDomain) -> Self {
        Self {
            domain,
            owners: Sharded::new(),
            finalized: AtomicBool::new(false),
        }
    }

    pub fn domain(&self) -> OwnerDomain {
        self.domain
    }

    /// Registers `id` as an existing chain record, unless it is already claimed.
    pub fn observe_head(&self, id: u64) {
        self.owners.with(&id, |owners| {
            owners.entry(id).or_insert(Owner::Unknown);
        });
    }

    /// Records `claimant` as referencing `id`.
    ///
    /// Returns a conflict when a different record already claimed `id`. Only
    /// the lower claimant stays recorded, so with several claimants every one
    /// but the lowest is reported exactly once.
    pub fn observe(&self, id: u64, claimant: Claimant) -> Option<Conflict> {
        let conflict = self.owners.with(&id, |owners| {
            let owner = owners.entry(id).or_insert(Owner::Unknown);
            match *owner {
                Owner::Claimed(current) if current != claimant => {
                    let conflict = if claimant < current {
                        Conflict {
                            owner: claimant,
                            other: current,
                        }
                    } else {
                        Conflict {
                            owner: current,
                            other: claimant,
                        }
                    };
                    *owner = Owner::Claimed(conflict.owner);
                    Some(conflict)
                }
                _ => {
                    *owner = Owner::Claimed(claimant);
                    None
                }
            }
        });
        if let Some(Conflict { owner, other }) = conflict {
            debug!(
                domain = ?self.domain,
                id,
                owner = %owner,
                other = %other,
                "check.owner.conflict"
            );
        }
        conflict
    }

    /// Number of ids tracked.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the tracker and returns ids that stayed unclaimed, ascending.
    ///
    /// `confirm` re-checks each candidate against the live store; candidates
    /// it rejects are dropped.
    pub fn finalize(&self, mut confirm: impl FnMut(u64) -> Result<bool>) -> Result<Vec<u64>> {
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Err(CheckError::invariant(format!(
                "owner tracker {:?} finalized more than once",
                self.domain
            )));
        }
        let mut candidates: Vec<u64> = self
            .owners
            .drain()
            .into_iter()
            .filter_map(|(id, owner)| (owner == Owner::Unknown).then_some(id))
            .collect();
        candidates.sort_unstable();
        let mut orphans = Vec::with_capacity(candidates.len());
        for id in candidates {
            if confirm(id)? {
                orphans.push(id);
            }
        }
        debug!(domain = ?self.domain, orphans = orphans.len(), "check.owner.finalized");
        Ok(orphans)
    }
}

/// One tracker per domain.
pub struct Owners {
    trackers: [OwnerTracker; 6],
}

impl Default for Owners {
    fn default() -> Self {
        Self::new()
    }
}

impl Owners {
    pub fn new() -> Self {
        Self {
            trackers: OwnerDomain::ALL.map(OwnerTracker::new),
        }
    }

    pub fn get(&self, domain: OwnerDomain) -> &OwnerTracker {
        &self.trackers[domain as usize]
    }
}
