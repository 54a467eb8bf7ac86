//! Checker decorators that feed the cross-pass aggregators.
//!
//! Each decorator runs the wrapped checker first and then updates its
//! aggregator for in-use records, adding any findings the update produces.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::aggregate::{
    Claimant, Conflict, CountsAccumulator, MandatoryProperties, OwnerDomain, Owners,
};
use crate::error::Result;
use crate::record::{
    DynamicRecord, LabelField, NodeRecord, PropertyRecord, PropertyValue, Record,
    RelationshipRecord, TokenRecord,
};
use crate::report::Finding;
use crate::stage::label_slots;
use crate::store::StoreAccess;
use crate::types::{LabelId, PropKeyId, RecordType, NONE};

use super::builtin::live;
use super::{checker, CheckContext, Checker};

/// Records that head a property chain.
pub trait PropertyOwner: Record {
    const RECORD_TYPE: RecordType;

    fn next_prop(&self) -> u64;
}

impl PropertyOwner for NodeRecord {
    const RECORD_TYPE: RecordType = RecordType::Node;

    fn next_prop(&self) -> u64 {
        self.next_prop
    }
}

impl PropertyOwner for RelationshipRecord {
    const RECORD_TYPE: RecordType = RecordType::Relationship;

    fn next_prop(&self) -> u64 {
        self.next_prop
    }
}

/// Reports the claimant that does not own the shared chain.
fn conflict(conflict: Conflict, target: u64, domain: OwnerDomain) -> Finding {
    let Conflict { owner, other } = conflict;
    Finding::error(
        other.record_type,
        other.id,
        format!("{} chain {target} is owned by {owner}", domain.record_type()),
    )
}

/// Counts in-use nodes by label.
pub fn counting_nodes(
    inner: Checker<NodeRecord>,
    counts: Arc<CountsAccumulator>,
) -> Checker<NodeRecord> {
    checker(move |record: &NodeRecord, ctx: &CheckContext<'_>| {
        let findings = inner(record, ctx)?;
        if record.in_use {
            counts.accumulate_node(&record.labels);
        }
        Ok(findings)
    })
}

/// Counts in-use relationships using the endpoint labels cached by the node pass.
pub fn counting_relationships(
    inner: Checker<RelationshipRecord>,
    counts: Arc<CountsAccumulator>,
) -> Checker<RelationshipRecord> {
    checker(move |record: &RelationshipRecord, ctx: &CheckContext<'_>| {
        let findings = inner(record, ctx)?;
        if record.in_use {
            let start = cached_labels(ctx, record.first_node)?;
            let end = cached_labels(ctx, record.second_node)?;
            counts.accumulate_relationship(record.rel_type, &start, &end);
        }
        Ok(findings)
    })
}

/// Labels of `node` as cached by the label stage, loading the node when the
/// cached field spilled. Nodes not in use have no labels.
pub fn cached_labels(ctx: &CheckContext<'_>, node: u64) -> Result<SmallVec<[LabelId; 3]>> {
    let cache = ctx.worker.cache;
    if node == NONE || !cache.covers(node) || !cache.get_flag(node, label_slots::IN_USE)? {
        return Ok(SmallVec::new());
    }
    match LabelField(cache.get(node, label_slots::LABELS)?).unpack() {
        Some(labels) => Ok(labels),
        None => Ok(live(ctx.stores.nodes.as_ref(), node)?
            .map(|record| record.labels.into_iter().collect())
            .unwrap_or_default()),
    }
}

/// Claims the property chain each in-use owner points at.
pub fn claiming_properties<R: PropertyOwner>(inner: Checker<R>, owners: Arc<Owners>) -> Checker<R> {
    checker(move |record: &R, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        let target = record.next_prop();
        if record.in_use() && target != NONE {
            let claimant = Claimant::new(R::RECORD_TYPE, record.id());
            if let Some(shared) = owners.get(OwnerDomain::Property).observe(target, claimant) {
                findings.push(conflict(shared, target, OwnerDomain::Property));
            }
        }
        Ok(findings)
    })
}

/// Registers property chain heads and claims the string and array chains of
/// each property value. Heads are only tracked when `track_heads` is set.
pub fn owning_property_values(
    inner: Checker<PropertyRecord>,
    owners: Arc<Owners>,
    track_heads: bool,
) -> Checker<PropertyRecord> {
    checker(move |record: &PropertyRecord, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        if !record.in_use {
            return Ok(findings);
        }
        if track_heads && record.prev_prop == NONE {
            owners.get(OwnerDomain::Property).observe_head(record.id);
        }
        let claimant = Claimant::new(RecordType::Property, record.id);
        for block in &record.blocks {
            let (domain, head) = match block.value {
                PropertyValue::String(head) => (OwnerDomain::String, head),
                PropertyValue::Array(head) => (OwnerDomain::Array, head),
                _ => continue,
            };
            if head == NONE {
                continue;
            }
            if let Some(shared) = owners.get(domain).observe(head, claimant) {
                findings.push(conflict(shared, head, domain));
            }
        }
        Ok(findings)
    })
}

/// Registers every in-use block of a dynamic store and claims its successor.
pub fn owning_dynamic_chain(
    inner: Checker<DynamicRecord>,
    owners: Arc<Owners>,
    domain: OwnerDomain,
) -> Checker<DynamicRecord> {
    checker(move |record: &DynamicRecord, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        if !record.in_use {
            return Ok(findings);
        }
        let tracker = owners.get(domain);
        tracker.observe_head(record.id);
        if record.next_block != NONE && record.next_block != record.id {
            let claimant = Claimant::new(domain.record_type(), record.id);
            if let Some(shared) = tracker.observe(record.next_block, claimant) {
                findings.push(conflict(shared, record.next_block, domain));
            }
        }
        Ok(findings)
    })
}

/// Claims the name chain of each in-use token.
pub fn claiming_token_names(
    inner: Checker<TokenRecord>,
    owners: Arc<Owners>,
) -> Checker<TokenRecord> {
    checker(move |record: &TokenRecord, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        if record.in_use && record.name_id != NONE {
            let domain = OwnerDomain::names_of(record.kind);
            let claimant = Claimant::new(record.kind.record_type(), record.id);
            if let Some(shared) = owners.get(domain).observe(record.name_id, claimant) {
                findings.push(conflict(shared, record.name_id, domain));
            }
        }
        Ok(findings)
    })
}

/// Reports mandatory properties missing from in-use nodes.
pub fn requiring_node_properties(
    inner: Checker<NodeRecord>,
    mandatory: Arc<MandatoryProperties>,
) -> Checker<NodeRecord> {
    checker(move |record: &NodeRecord, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        if record.in_use {
            let mut tracker = mandatory.for_node(record.id, &record.labels);
            if tracker.is_active() {
                tracker.receive(chain_keys(ctx.stores, record.next_prop)?);
            }
            findings.extend(tracker.close());
        }
        Ok(findings)
    })
}

/// Reports mandatory properties missing from in-use relationships.
pub fn requiring_relationship_properties(
    inner: Checker<RelationshipRecord>,
    mandatory: Arc<MandatoryProperties>,
) -> Checker<RelationshipRecord> {
    checker(move |record: &RelationshipRecord, ctx: &CheckContext<'_>| {
        let mut findings = inner(record, ctx)?;
        if record.in_use {
            let mut tracker = mandatory.for_relationship(record.id, record.rel_type);
            if tracker.is_active() {
                tracker.receive(chain_keys(ctx.stores, record.next_prop)?);
            }
            findings.extend(tracker.close());
        }
        Ok(findings)
    })
}

/// Property keys along the chain starting at `first`.
///
/// Stops at the first record not in use and at cycles; those are reported by
/// the property pass.
pub(crate) fn chain_keys(stores: &StoreAccess, first: u64) -> Result<Vec<PropKeyId>> {
    let mut keys = Vec::new();
    let mut seen = FxHashSet::default();
    let mut next = first;
    while next != NONE && seen.insert(next) {
        let Some(record) = live(stores.properties.as_ref(), next)? else {
            break;
        };
        keys.extend(record.keys());
        next = record.next_prop;
    }
    Ok(keys)
}
