//! Built-in structural rules for each record kind.
//!
//! Each rule reads the record and resolves referenced records directly through
//! the stores. Callers only hand in records that are in use.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::aggregate::OwnerDomain;
use crate::error::Result;
use crate::record::{
    DynamicRecord, NodeRecord, PropertyRecord, PropertyValue, Record, RelationshipGroupRecord,
    RelationshipRecord, SchemaRecord, SchemaRule, TokenKind, TokenRecord, DYNAMIC_BLOCK_CAPACITY,
};
use crate::report::Finding;
use crate::store::RecordStore;
use crate::types::{RecordType, NONE};

use super::{checker, in_use_only, CheckContext, Checker};

/// Loads `id` when it is in use.
pub(crate) fn live<R: Record>(store: &dyn RecordStore<R>, id: u64) -> Result<Option<R>> {
    if id == NONE || id >= store.high_id() {
        return Ok(None);
    }
    Ok(store.get(id)?.filter(|record| record.in_use()))
}

fn token_in_use(ctx: &CheckContext<'_>, kind: TokenKind, id: u32) -> Result<bool> {
    Ok(live(ctx.stores.tokens(kind).as_ref(), u64::from(id))?.is_some())
}

pub fn node(record: &NodeRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let report = |message: String| Finding::error(RecordType::Node, record.id, message);

    for pair in record.labels.windows(2) {
        if pair[0] == pair[1] {
            findings.push(report(format!("label {} appears more than once", pair[0])));
        } else if pair[0] > pair[1] {
            findings.push(report(format!(
                "labels are not sorted: {} before {}",
                pair[0], pair[1]
            )));
        }
    }
    for label in &record.labels {
        if !token_in_use(ctx, TokenKind::Label, label.0)? {
            findings.push(report(format!("label token {label} is not in use")));
        }
    }

    if record.next_rel != NONE {
        if record.dense {
            match live(ctx.stores.groups.as_ref(), record.next_rel)? {
                None => findings.push(report(format!(
                    "first relationship group {} is not in use",
                    record.next_rel
                ))),
                Some(group) if group.owner != record.id => findings.push(report(format!(
                    "first relationship group {} is owned by node {}",
                    record.next_rel, group.owner
                ))),
                Some(_) => {}
            }
        } else {
            match live(ctx.stores.relationships.as_ref(), record.next_rel)? {
                None => findings.push(report(format!(
                    "first relationship {} is not in use",
                    record.next_rel
                ))),
                Some(rel) if !rel.endpoints().contains(&record.id) => {
                    findings.push(report(format!(
                        "first relationship {} does not reference this node",
                        record.next_rel
                    )))
                }
                Some(_) => {}
            }
        }
    }
    Ok(findings)
}

pub fn relationship(record: &RelationshipRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let report = |message: String| Finding::error(RecordType::Relationship, record.id, message);

    if !token_in_use(ctx, TokenKind::RelationshipType, record.rel_type.0)? {
        findings.push(report(format!(
            "relationship type token {} is not in use",
            record.rel_type
        )));
    }
    if record.first_node == NONE || record.second_node == NONE {
        findings.push(report("relationship is missing an endpoint".to_string()));
        return Ok(findings);
    }

    for node in record.endpoints() {
        let next = record.next_for(node);
        if next != NONE {
            match live(ctx.stores.relationships.as_ref(), next)? {
                None => findings.push(report(format!(
                    "next relationship {next} in the chain of node {node} is not in use"
                ))),
                Some(other) if !other.endpoints().contains(&node) => findings.push(report(
                    format!("next relationship {next} does not reference node {node}"),
                )),
                Some(_) => {}
            }
        }
        // The prev field of a chain head holds the chain degree instead.
        if !record.is_first_for(node) {
            let prev = record.prev_for(node);
            match live(ctx.stores.relationships.as_ref(), prev)? {
                None => findings.push(report(format!(
                    "previous relationship {prev} in the chain of node {node} is not in use"
                ))),
                Some(other) if !other.endpoints().contains(&node) => findings.push(report(
                    format!("previous relationship {prev} does not reference node {node}"),
                )),
                Some(_) => {}
            }
        }
    }
    Ok(findings)
}

pub fn group(record: &RelationshipGroupRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let error = |message: String| Finding::error(RecordType::RelationshipGroup, record.id, message);

    match live(ctx.stores.nodes.as_ref(), record.owner)? {
        None => findings.push(error(format!("owner node {} is not in use", record.owner))),
        Some(owner) if !owner.dense => {
            findings.push(error(format!("owner node {} is not dense", record.owner)))
        }
        Some(_) => {}
    }
    if !token_in_use(ctx, TokenKind::RelationshipType, record.rel_type.0)? {
        findings.push(error(format!(
            "relationship type token {} is not in use",
            record.rel_type
        )));
    }
    if record.next != NONE {
        match live(ctx.stores.groups.as_ref(), record.next)? {
            None => findings.push(error(format!("next group {} is not in use", record.next))),
            Some(next) => {
                if next.owner != record.owner {
                    findings.push(error(format!(
                        "next group {} belongs to node {}",
                        record.next, next.owner
                    )));
                }
                if next.rel_type <= record.rel_type {
                    findings.push(Finding::warning(
                        RecordType::RelationshipGroup,
                        record.id,
                        format!(
                            "next group {} has type {} not after {}",
                            record.next, next.rel_type, record.rel_type
                        ),
                    ));
                }
            }
        }
    }
    for (direction, first) in [
        ("outgoing", record.first_out),
        ("incoming", record.first_in),
        ("loop", record.first_loop),
    ] {
        if first != NONE && live(ctx.stores.relationships.as_ref(), first)?.is_none() {
            findings.push(error(format!(
                "first {direction} relationship {first} is not in use"
            )));
        }
    }
    Ok(findings)
}

pub fn property(record: &PropertyRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    let report = |message: String| Finding::error(RecordType::Property, record.id, message);

    if record.blocks.is_empty() {
        findings.push(report("property record in use without blocks".to_string()));
    }
    let mut keys = FxHashSet::default();
    for block in &record.blocks {
        if !keys.insert(block.key) {
            findings.push(report(format!("property key {} appears more than once", block.key)));
        }
        if !token_in_use(ctx, TokenKind::PropertyKey, block.key.0)? {
            findings.push(report(format!("property key token {} is not in use", block.key)));
        }
        let (kind, store, head) = match block.value {
            PropertyValue::String(head) => ("string", &ctx.stores.strings, head),
            PropertyValue::Array(head) => ("array", &ctx.stores.arrays, head),
            _ => continue,
        };
        if live(store.as_ref(), head)?.is_none() {
            findings.push(report(format!("{kind} block {head} is not in use")));
        }
    }

    if record.next_prop != NONE {
        match live(ctx.stores.properties.as_ref(), record.next_prop)? {
            None => findings.push(report(format!(
                "next property record {} is not in use",
                record.next_prop
            ))),
            Some(next) if next.prev_prop != record.id => findings.push(report(format!(
                "next property record {} points back to {}",
                record.next_prop, next.prev_prop
            ))),
            Some(_) => {}
        }
    }
    if record.prev_prop != NONE {
        match live(ctx.stores.properties.as_ref(), record.prev_prop)? {
            None => findings.push(report(format!(
                "previous property record {} is not in use",
                record.prev_prop
            ))),
            Some(prev) if prev.next_prop != record.id => findings.push(report(format!(
                "previous property record {} points forward to {}",
                record.prev_prop, prev.next_prop
            ))),
            Some(_) => {}
        }
    }
    Ok(findings)
}

/// Dynamic block rules for the store of `domain`.
pub fn dynamic(domain: OwnerDomain) -> Checker<DynamicRecord> {
    in_use_only(checker(
        move |record: &DynamicRecord, ctx: &CheckContext<'_>| {
            let record_type = domain.record_type();
            let mut findings = Vec::new();
            let report = |message: String| Finding::error(record_type, record.id, message);

            if record.length == 0 {
                findings.push(report("in-use block is empty".to_string()));
            }
            if record.length > DYNAMIC_BLOCK_CAPACITY {
                findings.push(report(format!(
                    "block length {} exceeds capacity {DYNAMIC_BLOCK_CAPACITY}",
                    record.length
                )));
            }
            if record.next_block != NONE {
                if record.next_block == record.id {
                    findings.push(report("block references itself as next".to_string()));
                    return Ok(findings);
                }
                if record.length < DYNAMIC_BLOCK_CAPACITY {
                    findings.push(report(format!(
                        "block with successor is not full ({} of {DYNAMIC_BLOCK_CAPACITY})",
                        record.length
                    )));
                }
                let store = ctx.stores.dynamic(domain);
                let next = match store {
                    Some(store) => live(store.as_ref(), record.next_block)?,
                    None => None,
                };
                if next.is_none() {
                    findings.push(report(format!(
                        "next block {} is not in use",
                        record.next_block
                    )));
                }
            }
            Ok(findings)
        },
    ))
}

pub fn token(record: &TokenRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let record_type = record.kind.record_type();
    if record.name_id == NONE {
        return Ok(vec![Finding::error(
            record_type,
            record.id,
            "token has no name",
        )]);
    }
    let names: Option<&Arc<dyn RecordStore<DynamicRecord>>> =
        ctx.stores.dynamic(OwnerDomain::names_of(record.kind));
    let name = match names {
        Some(names) => live(names.as_ref(), record.name_id)?,
        None => None,
    };
    if name.is_none() {
        return Ok(vec![Finding::error(
            record_type,
            record.id,
            format!("name block {} is not in use", record.name_id),
        )]);
    }
    Ok(Vec::new())
}

pub fn schema(record: &SchemaRecord, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
    let report = |message: String| Finding::error(RecordType::Schema, record.id, message);
    let Some(rule) = &record.rule else {
        return Ok(vec![report("schema rule could not be read".to_string())]);
    };
    let mut findings = Vec::new();
    let (label, rel_type, keys) = match rule {
        SchemaRule::Index { label, keys, .. }
        | SchemaRule::UniquenessConstraint { label, keys, .. } => {
            (Some(*label), None, keys.clone())
        }
        SchemaRule::NodePropertyExistence { label, key } => (Some(*label), None, vec![*key]),
        SchemaRule::RelationshipPropertyExistence { rel_type, key } => {
            (None, Some(*rel_type), vec![*key])
        }
    };
    if keys.is_empty() {
        findings.push(report(format!("{} rule has no property keys", rule.kind())));
    }
    if let Some(label) = label {
        if !token_in_use(ctx, TokenKind::Label, label.0)? {
            findings.push(report(format!("label token {label} is not in use")));
        }
    }
    if let Some(rel_type) = rel_type {
        if !token_in_use(ctx, TokenKind::RelationshipType, rel_type.0)? {
            findings.push(report(format!(
                "relationship type token {rel_type} is not in use"
            )));
        }
    }
    for key in keys {
        if !token_in_use(ctx, TokenKind::PropertyKey, key.0)? {
            findings.push(report(format!("property key token {key} is not in use")));
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::distribution::Partitioning;
    use crate::pool::WorkerContext;
    use crate::record::PropertyValue;
    use crate::store::StoreAccess;
    use crate::types::LabelId;

    fn with_ctx<T>(stores: &StoreAccess, f: impl FnOnce(&CheckContext<'_>) -> T) -> T {
        let cache = CacheStore::new();
        let worker = WorkerContext::new(cache.client(), Partitioning::Shared);
        f(&CheckContext::new(stores, worker))
    }

    fn label_tokens(ids: &[u64]) -> Vec<TokenRecord> {
        ids.iter()
            .map(|&id| TokenRecord::new(id, TokenKind::Label, id))
            .collect()
    }

    #[test]
    fn node_reports_unsorted_and_unknown_labels() {
        let stores = StoreAccess::in_memory().with_labels(label_tokens(&[1, 2]), Vec::new());
        let node = NodeRecord::new(0).with_labels(&[2, 1, 9]);
        let findings = with_ctx(&stores, |ctx| super::node(&node, ctx)).expect("check");
        assert_eq!(findings.len(), 2);
        assert!(findings[0].message.contains("not sorted"));
        assert!(findings[1].message.contains(&LabelId(9).to_string()));
    }

    #[test]
    fn relationship_next_must_share_the_node() {
        let mut first = RelationshipRecord::new(0, 1, 2, 0);
        first.first_next_rel = 1;
        let stores = StoreAccess::in_memory()
            .with_relationship_types(
                vec![TokenRecord::new(0, TokenKind::RelationshipType, 0)],
                Vec::new(),
            )
            .with_relationships(vec![first.clone(), RelationshipRecord::new(1, 3, 4, 0)]);
        let findings = with_ctx(&stores, |ctx| super::relationship(&first, ctx)).expect("check");
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("does not reference node 1"));
    }

    #[test]
    fn property_chain_links_must_agree() {
        let head = PropertyRecord::new(0)
            .with_block(0, PropertyValue::Int(1))
            .linked(NONE, 1);
        let tail = PropertyRecord::new(1)
            .with_block(1, PropertyValue::String(5))
            .linked(7, NONE);
        let stores = StoreAccess::in_memory()
            .with_property_keys(
                vec![
                    TokenRecord::new(0, TokenKind::PropertyKey, 0),
                    TokenRecord::new(1, TokenKind::PropertyKey, 1),
                ],
                Vec::new(),
            )
            .with_properties(vec![head.clone(), tail.clone()]);
        let head_findings = with_ctx(&stores, |ctx| super::property(&head, ctx)).expect("check");
        assert_eq!(head_findings.len(), 1);
        assert!(head_findings[0].message.contains("points back to 7"));
        let tail_findings = with_ctx(&stores, |ctx| super::property(&tail, ctx)).expect("check");
        assert_eq!(tail_findings.len(), 2);
    }

    #[test]
    fn partial_block_with_successor_is_reported() {
        let stores = StoreAccess::in_memory().with_strings(vec![
            DynamicRecord::new(0, 10).with_next(1),
            DynamicRecord::new(1, 5),
        ]);
        let check = dynamic(OwnerDomain::String);
        let first = DynamicRecord::new(0, 10).with_next(1);
        let findings = with_ctx(&stores, |ctx| check(&first, ctx)).expect("check");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].record_type, RecordType::StringProperty);
    }

    #[test]
    fn schema_rule_without_content_is_reported() {
        let stores = StoreAccess::in_memory();
        let mut record = SchemaRecord::new(
            0,
            SchemaRule::NodePropertyExistence {
                label: LabelId(0),
                key: crate::types::PropKeyId(0),
            },
        );
        record.rule = None;
        let findings = with_ctx(&stores, |ctx| super::schema(&record, ctx)).expect("check");
        assert_eq!(findings.len(), 1);
    }
}
