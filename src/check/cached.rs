//! Checks that pass facts between stages through the cache.
//!
//! Every write here targets a node id the calling worker owns, either because
//! the pass is a node pass (one record per node) or because relationship
//! passes run with endpoint affinity and skip endpoints owned by others.

use std::sync::Arc;

use crate::error::Result;
use crate::record::{LabelField, NodeRecord, RelationshipRecord};
use crate::report::Finding;
use crate::stage::{chain_slots, label_slots, next_rel_slots};
use crate::stats::Statistics;
use crate::types::{RecordType, NONE};

use super::builtin::live;
use super::{checker, CheckContext, Checker};

/// Caches the in-use flag and packed labels of every node.
pub fn cache_labels(inner: Checker<NodeRecord>) -> Checker<NodeRecord> {
    checker(move |record: &NodeRecord, ctx: &CheckContext<'_>| {
        let findings = inner(record, ctx)?;
        let cache = ctx.worker.cache;
        if cache.covers(record.id) {
            cache.put_flag(record.id, label_slots::IN_USE, record.in_use)?;
            if record.in_use {
                cache.put(record.id, label_slots::LABELS, LabelField::pack(&record.labels).0)?;
            }
        }
        Ok(findings)
    })
}

/// Caches the in-use flag, density and first relationship or group of every
/// node, and counts dense and sparse nodes.
pub fn cache_next_rel(stats: Arc<Statistics>) -> Checker<NodeRecord> {
    checker(move |record: &NodeRecord, ctx: &CheckContext<'_>| {
        let cache = ctx.worker.cache;
        if !cache.covers(record.id) {
            return Ok(Vec::new());
        }
        cache.put_flag(record.id, next_rel_slots::IN_USE, record.in_use)?;
        cache.put_flag(record.id, next_rel_slots::FIRST_SEEN, false)?;
        cache.put_flag(record.id, next_rel_slots::DENSE, record.in_use && record.dense)?;
        let next_rel = if record.in_use { record.next_rel } else { NONE };
        cache.put(record.id, next_rel_slots::NEXT_REL, next_rel)?;
        if record.in_use {
            stats.node(record.dense);
        }
        Ok(Vec::new())
    })
}

/// Checks each owned endpoint against the cached node: in use, and the
/// first-in-chain flag agreeing with the head of the chain the relationship
/// belongs to. Dense nodes keep one chain per type and direction, headed
/// from their relationship groups.
pub fn check_endpoints() -> Checker<RelationshipRecord> {
    checker(|record: &RelationshipRecord, ctx: &CheckContext<'_>| {
        let mut findings = Vec::new();
        if !record.in_use {
            return Ok(findings);
        }
        let cache = ctx.worker.cache;
        let report =
            |message: String| Finding::error(RecordType::Relationship, record.id, message);
        for node in record.endpoints() {
            if node == NONE || !ctx.worker.owns(node) {
                continue;
            }
            if !cache.covers(node) {
                findings.push(report(format!("endpoint node {node} is beyond the node store")));
                continue;
            }
            if !cache.get_flag(node, next_rel_slots::IN_USE)? {
                findings.push(report(format!("endpoint node {node} is not in use")));
                continue;
            }
            let next_rel = cache.get(node, next_rel_slots::NEXT_REL)?;
            let (chain, head) = if cache.get_flag(node, next_rel_slots::DENSE)? {
                ("group chain", group_chain_head(ctx, record, node, next_rel)?)
            } else {
                ("chain", next_rel)
            };
            if record.is_first_for(node) {
                if head == record.id {
                    cache.put_flag(node, next_rel_slots::FIRST_SEEN, true)?;
                } else {
                    findings.push(report(format!(
                        "marked first in the {chain} of node {node}, whose first relationship is {head}"
                    )));
                }
            } else if head == record.id {
                findings.push(report(format!(
                    "node {node} starts its {chain} here but the relationship is not marked first"
                )));
            }
        }
        Ok(findings)
    })
}

/// First relationship of the chain `record` joins at dense `node`, taken from
/// the node's group for the relationship type. `NONE` when there is no group.
fn group_chain_head(
    ctx: &CheckContext<'_>,
    record: &RelationshipRecord,
    node: u64,
    first_group: u64,
) -> Result<u64> {
    let groups = ctx.stores.groups.as_ref();
    let mut next = first_group;
    // Broken or cyclic group chains are reported by the group pass.
    for _ in 0..groups.high_id() {
        let Some(group) = live(groups, next)? else {
            break;
        };
        if group.owner != node {
            break;
        }
        if group.rel_type == record.rel_type {
            return Ok(if record.first_node == record.second_node {
                group.first_loop
            } else if node == record.first_node {
                group.first_out
            } else {
                group.first_in
            });
        }
        next = group.next;
    }
    Ok(NONE)
}

/// Checks that every sparse node's first relationship was seen marked first.
pub fn check_next_rel_seen() -> Checker<NodeRecord> {
    checker(|record: &NodeRecord, ctx: &CheckContext<'_>| {
        let cache = ctx.worker.cache;
        if !record.in_use || record.dense || record.next_rel == NONE || !cache.covers(record.id) {
            return Ok(Vec::new());
        }
        if cache.get_flag(record.id, next_rel_slots::FIRST_SEEN)? {
            return Ok(Vec::new());
        }
        // A missing relationship is reported by the node check itself.
        if live(ctx.stores.relationships.as_ref(), record.next_rel)?.is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::error(
            RecordType::Node,
            record.id,
            format!(
                "first relationship {} is not marked first in this node's chain",
                record.next_rel
            ),
        )])
    })
}

/// Walks endpoint chains in scan direction and checks that each link ahead
/// is answered by a matching back link.
///
/// For every owned endpoint a pending link (target, referrer) waits in the
/// cache until the scan reaches the target. When a node already has a link
/// pending, the new one is checked by loading its target directly. Links are
/// counted into `stats` on the forward scan only.
pub fn check_chain_links(stats: Arc<Statistics>) -> Checker<RelationshipRecord> {
    checker(move |record: &RelationshipRecord, ctx: &CheckContext<'_>| {
        let mut findings = Vec::new();
        if !record.in_use || record.first_node == NONE || record.second_node == NONE {
            return Ok(findings);
        }
        let cache = ctx.worker.cache;
        let forward = cache.is_forward();
        for node in record.endpoints() {
            if !ctx.worker.owns(node) || !cache.covers(node) {
                continue;
            }

            let expected = cache.get(node, chain_slots::EXPECTED)?;
            if expected == record.id + 1 {
                let referrer = cache.get(node, chain_slots::REFERRER)?;
                if let Some(finding) = back_link_mismatch(record, node, referrer) {
                    findings.push(finding);
                }
                cache.put(node, chain_slots::EXPECTED, 0)?;
            }

            let next = record.next_for(node);
            if forward {
                stats.link(record.id, next, NONE);
            }
            let ahead = next != NONE && if forward { next > record.id } else { next < record.id };
            if !ahead {
                continue;
            }
            if cache.get(node, chain_slots::EXPECTED)? == 0 {
                cache.put(node, chain_slots::EXPECTED, next + 1)?;
                cache.put(node, chain_slots::REFERRER, record.id)?;
            } else if let Some(target) = live(ctx.stores.relationships.as_ref(), next)? {
                if target.endpoints().contains(&node) {
                    if let Some(finding) = back_link_mismatch(&target, node, record.id) {
                        findings.push(finding);
                    }
                }
            }
        }
        Ok(findings)
    })
}

fn back_link_mismatch(target: &RelationshipRecord, node: u64, referrer: u64) -> Option<Finding> {
    if target.is_first_for(node) {
        return Some(Finding::error(
            RecordType::Relationship,
            target.id,
            format!(
                "follows relationship {referrer} in the chain of node {node} but is marked first"
            ),
        ));
    }
    let prev = target.prev_for(node);
    (prev != referrer).then(|| {
        Finding::error(
            RecordType::Relationship,
            target.id,
            format!(
                "previous relationship for node {node} is {prev}, but relationship {referrer} points here"
            ),
        )
    })
}
