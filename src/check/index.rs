//! Cross-checks between the graph stores and the label/type scan stores,
//! schema indexes and physical structure checks.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::record::{NodeRecord, SchemaRule};
use crate::report::Finding;
use crate::store::{IndexAccessor, StoreAccess, StructureCheck, TokenScanEntry};
use crate::types::{LabelId, RecordType};

use super::builtin::live;
use super::decorate::chain_keys;
use super::{checker, CheckContext, Checker};

/// Checks that each node appears in the label scan store with exactly its labels.
pub fn node_in_label_index() -> Checker<NodeRecord> {
    checker(|record: &NodeRecord, ctx: &CheckContext<'_>| {
        let Some(scan) = ctx.stores.label_scan.as_ref() else {
            return Ok(Vec::new());
        };
        let entry = live(scan.as_ref(), record.id)?.filter(|entry| !entry.tokens.is_empty());
        let labelled = record.in_use && !record.labels.is_empty();
        let report = |message: String| vec![Finding::error(RecordType::Node, record.id, message)];
        Ok(match (labelled, entry) {
            (false, None) => Vec::new(),
            (true, None) => {
                report("labelled node is missing from the label scan store".to_string())
            }
            (false, Some(entry)) => report(format!(
                "label scan store lists labels {:?} for a node without labels",
                entry.tokens
            )),
            (true, Some(entry)) => {
                let mut indexed = entry.tokens.clone();
                indexed.sort_unstable();
                indexed.dedup();
                let mut labels: Vec<u32> = record.labels.iter().map(|label| label.0).collect();
                labels.sort_unstable();
                labels.dedup();
                if indexed == labels {
                    Vec::new()
                } else {
                    report(format!(
                        "label scan store lists labels {indexed:?}, node has {labels:?}"
                    ))
                }
            }
        })
    })
}

/// Checks that each label scan entry refers to an in-use node carrying its labels.
pub fn label_scan_entry() -> Checker<TokenScanEntry> {
    checker(|entry: &TokenScanEntry, ctx: &CheckContext<'_>| {
        let report = |message: String| {
            Finding::error(RecordType::LabelScanDocument, entry.entity, message)
        };
        if entry.tokens.is_empty() {
            return Ok(Vec::new());
        }
        let Some(node) = live(ctx.stores.nodes.as_ref(), entry.entity)? else {
            return Ok(vec![report(format!("node {} is not in use", entry.entity))]);
        };
        Ok(entry
            .tokens
            .iter()
            .filter(|&&label| !node.labels.contains(&LabelId(label)))
            .map(|label| report(format!("node {} does not carry label {label}", node.id)))
            .collect())
    })
}

/// Checks that each type scan entry refers to an in-use relationship of its type.
pub fn type_scan_entry() -> Checker<TokenScanEntry> {
    checker(|entry: &TokenScanEntry, ctx: &CheckContext<'_>| {
        let report = |message: String| {
            vec![Finding::error(
                RecordType::RelationshipTypeScanDocument,
                entry.entity,
                message,
            )]
        };
        if entry.tokens.is_empty() {
            return Ok(Vec::new());
        }
        let Some(rel) = live(ctx.stores.relationships.as_ref(), entry.entity)? else {
            return Ok(report(format!("relationship {} is not in use", entry.entity)));
        };
        if entry.tokens != [rel.rel_type.0] {
            return Ok(report(format!(
                "type scan store lists types {:?}, relationship has type {}",
                entry.tokens, rel.rel_type
            )));
        }
        Ok(Vec::new())
    })
}

/// Runs one structure check. A check that cannot complete becomes a finding.
pub fn structure(position: usize, check: &dyn StructureCheck) -> Vec<Finding> {
    let report = |message: String| Finding::error(RecordType::Structure, position as u64, message);
    match check.check() {
        Ok(problems) => problems
            .into_iter()
            .map(|problem| report(format!("{}: {problem}", check.name())))
            .collect(),
        Err(err) => {
            warn!(structure = check.name(), error = %err, "check.structure.failed");
            vec![report(format!("{}: structure check failed: {err}", check.name()))]
        }
    }
}

/// Structural verification of one index; `true` when it may stay online.
pub fn index_structure(index: &dyn IndexAccessor) -> (Vec<Finding>, bool) {
    let report = |message: String| Finding::error(RecordType::IndexEntry, index.rule_id(), message);
    match index.verify_structure() {
        Ok(problems) if problems.is_empty() => (Vec::new(), true),
        Ok(problems) => {
            let findings = problems
                .into_iter()
                .map(|problem| report(format!("{}: {problem}", index.name())))
                .collect();
            (findings, false)
        }
        Err(err) => {
            warn!(index = index.name(), error = %err, "check.index.verify_failed");
            (vec![report(format!("{}: verification failed: {err}", index.name()))], false)
        }
    }
}

/// Checks every entry of an online index against the node store and its rule.
pub fn index_content(index: &dyn IndexAccessor, stores: &StoreAccess) -> Result<Vec<Finding>> {
    let rule_id = index.rule_id();
    let report = |message: String| Finding::error(RecordType::IndexEntry, rule_id, message);
    let rule = live(stores.schema.as_ref(), rule_id)?.and_then(|record| record.rule);
    let Some(SchemaRule::Index {
        label, keys, unique, ..
    }) = rule
    else {
        return Ok(vec![report(format!(
            "{}: schema rule {rule_id} is not an index rule",
            index.name()
        ))]);
    };

    let mut findings = Vec::new();
    let mut values: FxHashMap<Vec<u8>, u64> = FxHashMap::default();
    let entries = index.entries()?;
    debug!(index = index.name(), entries = entries.len(), "check.index.content");
    for entry in entries {
        let Some(node) = live(stores.nodes.as_ref(), entry.node)? else {
            findings.push(report(format!(
                "entry refers to node {} which is not in use",
                entry.node
            )));
            continue;
        };
        if !node.labels.contains(&label) {
            findings.push(report(format!("node {} does not carry label {label}", node.id)));
        }
        let present = chain_keys(stores, node.next_prop)?;
        for key in keys.iter().filter(|key| !present.contains(*key)) {
            findings.push(report(format!("node {} has no property {key}", node.id)));
        }
        if unique {
            if let Some(other) = values.insert(entry.value, node.id) {
                if other != node.id {
                    findings.push(report(format!(
                        "nodes {other} and {} share a value in a unique index",
                        node.id
                    )));
                }
            }
        }
    }
    Ok(findings)
}
