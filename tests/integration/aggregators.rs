#![allow(missing_docs)]

use std::thread;

use storecheck::aggregate::{
    Claimant, CountsAccumulator, CountsKey, CountsMismatch, CountsReconciliation,
    MandatoryProperties, OwnerDomain, Owners, WILDCARD,
};
use storecheck::record::SchemaRule;
use storecheck::store::MemoryCounts;
use storecheck::types::{LabelId, PropKeyId, RelTypeId};
use storecheck::{CheckError, RecordType, Result};

const THREADS: u64 = 4;
const PER_THREAD: u64 = 250;

fn property(id: u64) -> Claimant {
    Claimant::new(RecordType::Property, id)
}

/// Every thread registers its share of string heads and claims each one once.
fn observe_concurrently(
    owners: &Owners,
    skip_claim: Option<u64>,
    extra_claim: Option<u64>,
) -> usize {
    let tracker = owners.get(OwnerDomain::String);
    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                scope.spawn(move || {
                    let mut conflicts = 0;
                    for head in t * PER_THREAD..(t + 1) * PER_THREAD {
                        tracker.observe_head(head);
                        if Some(head) != skip_claim {
                            let claim = tracker.observe(head, property(head));
                            conflicts += usize::from(claim.is_some());
                        }
                    }
                    conflicts
                })
            })
            .collect();
        let mut conflicts: usize = handles
            .into_iter()
            .map(|handle| handle.join().expect("observer thread"))
            .sum();
        if let Some(head) = extra_claim {
            conflicts += usize::from(tracker.observe(head, property(u64::MAX)).is_some());
        }
        conflicts
    })
}

#[test]
fn consistent_ownership_reports_nothing() -> Result<()> {
    let owners = Owners::new();
    assert_eq!(observe_concurrently(&owners, None, None), 0);
    let orphans = owners.get(OwnerDomain::String).finalize(|_| Ok(true))?;
    assert!(orphans.is_empty());
    Ok(())
}

#[test]
fn one_shared_chain_is_one_conflict() -> Result<()> {
    let owners = Owners::new();
    assert_eq!(observe_concurrently(&owners, None, Some(321)), 1);
    assert!(owners.get(OwnerDomain::String).finalize(|_| Ok(true))?.is_empty());
    Ok(())
}

#[test]
fn one_unclaimed_chain_is_one_orphan() -> Result<()> {
    let owners = Owners::new();
    assert_eq!(observe_concurrently(&owners, Some(777), None), 0);
    let tracker = owners.get(OwnerDomain::String);
    assert_eq!(tracker.finalize(|_| Ok(true))?, vec![777]);
    assert!(matches!(tracker.finalize(|_| Ok(true)), Err(CheckError::Invariant(_))));
    // Other domains are untouched.
    assert!(owners.get(OwnerDomain::Array).is_empty());
    Ok(())
}

#[test]
fn concurrent_counts_reconcile_cleanly() -> Result<()> {
    let counts = CountsAccumulator::new();
    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PER_THREAD {
                    counts.accumulate_node(&[LabelId(1)]);
                    counts.accumulate_relationship(RelTypeId(2), &[LabelId(1)], &[]);
                }
            });
        }
    });
    let total = THREADS * PER_THREAD;
    let persisted = MemoryCounts::new(vec![
        (CountsKey::node(WILDCARD), total),
        (CountsKey::node(1), total),
        (CountsKey::relationship(WILDCARD, WILDCARD, WILDCARD), total),
        (CountsKey::relationship(WILDCARD, 2, WILDCARD), total),
        (CountsKey::relationship(1, WILDCARD, WILDCARD), total),
        (CountsKey::relationship(1, 2, WILDCARD), total),
    ]);
    assert_eq!(
        counts.reconcile(Some(&persisted))?,
        CountsReconciliation::Checked(Vec::new())
    );
    Ok(())
}

#[test]
fn counts_differences_are_listed_in_key_order() -> Result<()> {
    let counts = CountsAccumulator::new();
    for _ in 0..5 {
        counts.accumulate_node(&[]);
    }
    counts.accumulate_node(&[LabelId(3), LabelId(3)]);
    let persisted = MemoryCounts::new(vec![
        (CountsKey::node(WILDCARD), 5),
        (CountsKey::node(4), 2),
    ]);
    let outcome = counts.reconcile(Some(&persisted))?;
    let CountsReconciliation::Checked(mismatches) = outcome else {
        panic!("counts store should be readable");
    };
    assert_eq!(
        mismatches,
        vec![
            CountsMismatch {
                key: CountsKey::node(3),
                expected: 1,
                persisted: 0,
            },
            CountsMismatch {
                key: CountsKey::node(4),
                expected: 0,
                persisted: 2,
            },
            CountsMismatch {
                key: CountsKey::node(WILDCARD),
                expected: 6,
                persisted: 5,
            },
        ]
    );
    Ok(())
}

#[test]
fn missing_counts_store_is_not_fatal() -> Result<()> {
    let counts = CountsAccumulator::new();
    counts.accumulate_node(&[]);
    let outcome = counts.reconcile(Some(&MemoryCounts::missing()))?;
    assert!(matches!(outcome, CountsReconciliation::StoreUnavailable(_)));
    assert!(matches!(counts.reconcile(None), Err(CheckError::Invariant(_))));
    Ok(())
}

#[test]
fn mandatory_properties_follow_every_label() {
    let mandatory = MandatoryProperties::from_rules(&[
        SchemaRule::NodePropertyExistence {
            label: LabelId(1),
            key: PropKeyId(10),
        },
        SchemaRule::NodePropertyExistence {
            label: LabelId(2),
            key: PropKeyId(20),
        },
        SchemaRule::Index {
            label: LabelId(1),
            keys: vec![PropKeyId(30)],
            unique: false,
            owning_constraint: None,
        },
    ]);

    let mut tracker = mandatory.for_node(9, &[LabelId(1), LabelId(2)]);
    tracker.receive([PropKeyId(20), PropKeyId(30)]);
    let findings = tracker.close();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].record_type, RecordType::Node);
    assert_eq!(findings[0].message, "mandatory property 10 is missing");

    let mut satisfied = mandatory.for_node(9, &[LabelId(2)]);
    satisfied.receive([PropKeyId(20)]);
    assert!(satisfied.close().is_empty());
    assert!(!mandatory.for_relationship(1, RelTypeId(0)).is_active());
}
