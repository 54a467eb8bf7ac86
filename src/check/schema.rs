//! Schema store passes.
//!
//! The chain pass stands alone. The rule pass fills a [`SchemaContext`] that
//! the obligation pass then verifies; both are handed the same context when
//! the tasks are planned.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::record::{SchemaRecord, SchemaRule};
use crate::report::Finding;
use crate::types::{RecordType, NONE};

use super::{chain, checker, CheckContext, Checker};

/// What one rule expects of another rule.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Obligation {
    /// The target must be an index owned by the source constraint.
    IndexOwnedBy,
    /// The target must be a uniqueness constraint owning the source index.
    ConstraintOwning,
}

/// Facts the rule pass gathers for the obligation pass.
#[derive(Debug, Default)]
pub struct SchemaContext {
    contents: FxHashMap<String, u64>,
    /// Target rule id to (source rule id, expectation).
    obligations: BTreeMap<u64, Vec<(u64, Obligation)>>,
    rules: usize,
}

impl SchemaContext {
    pub fn shared() -> Arc<Mutex<SchemaContext>> {
        Arc::new(Mutex::new(SchemaContext::default()))
    }

    /// Rules registered by the rule pass.
    pub fn rules(&self) -> usize {
        self.rules
    }

    /// Drains the obligations no visited record satisfied or rejected.
    pub fn unresolved(&mut self) -> Vec<Finding> {
        std::mem::take(&mut self.obligations)
            .into_iter()
            .flat_map(|(target, sources)| {
                sources.into_iter().map(move |(source, obligation)| {
                    let wanted = match obligation {
                        Obligation::IndexOwnedBy => "index",
                        Obligation::ConstraintOwning => "constraint",
                    };
                    Finding::error(
                        RecordType::Schema,
                        source,
                        format!("referenced {wanted} rule {target} does not exist"),
                    )
                })
            })
            .collect()
    }
}

/// Base schema check plus detection of rule chains shared by two records.
pub fn chains(base: Checker<SchemaRecord>) -> Checker<SchemaRecord> {
    let heads: Arc<Mutex<FxHashMap<u64, u64>>> = Arc::new(Mutex::new(FxHashMap::default()));
    let shared = checker(move |record: &SchemaRecord, _ctx: &CheckContext<'_>| {
        if !record.in_use || record.first_block == NONE {
            return Ok(Vec::new());
        }
        let previous = heads.lock().insert(record.first_block, record.id);
        Ok(match previous {
            Some(other) if other != record.id => vec![Finding::error(
                RecordType::Schema,
                record.id,
                format!(
                    "rule chain {} is also used by schema record {other}",
                    record.first_block
                ),
            )],
            _ => Vec::new(),
        })
    });
    chain(base, shared)
}

/// Registers every readable rule, reporting duplicated rule content and
/// recording what each rule expects of the rule it references.
pub fn rules(context: Arc<Mutex<SchemaContext>>) -> Checker<SchemaRecord> {
    checker(move |record: &SchemaRecord, _ctx: &CheckContext<'_>| {
        let Some(rule) = record.rule.as_ref().filter(|_| record.in_use) else {
            return Ok(Vec::new());
        };
        let mut context = context.lock();
        context.rules += 1;
        let mut findings = Vec::new();
        if let Some(first) = context.contents.insert(rule.content_key(), record.id) {
            findings.push(Finding::error(
                RecordType::Schema,
                record.id,
                format!("{} rule duplicates schema rule {first}", rule.kind()),
            ));
        }
        let expectation = match *rule {
            SchemaRule::Index {
                owning_constraint: Some(constraint),
                ..
            } => Some((constraint, Obligation::ConstraintOwning)),
            SchemaRule::UniquenessConstraint { owned_index, .. } => {
                Some((owned_index, Obligation::IndexOwnedBy))
            }
            _ => None,
        };
        if let Some((target, obligation)) = expectation {
            context
                .obligations
                .entry(target)
                .or_default()
                .push((record.id, obligation));
        }
        Ok(findings)
    })
}

/// Settles the obligations whose target is the visited rule.
pub fn obligations(context: Arc<Mutex<SchemaContext>>) -> Checker<SchemaRecord> {
    checker(move |record: &SchemaRecord, _ctx: &CheckContext<'_>| {
        let Some(sources) = context.lock().obligations.remove(&record.id) else {
            return Ok(Vec::new());
        };
        let rule = record.rule.as_ref().filter(|_| record.in_use);
        let findings = sources
            .into_iter()
            .filter(|&(source, obligation)| !satisfies(rule, source, obligation))
            .map(|(source, obligation)| {
                let message = match obligation {
                    Obligation::IndexOwnedBy => format!(
                        "owned index rule {} is not an index owned by this constraint",
                        record.id
                    ),
                    Obligation::ConstraintOwning => format!(
                        "owning constraint rule {} is not a uniqueness constraint owning this index",
                        record.id
                    ),
                };
                Finding::error(RecordType::Schema, source, message)
            })
            .collect();
        Ok(findings)
    })
}

fn satisfies(target: Option<&SchemaRule>, source: u64, obligation: Obligation) -> bool {
    match (obligation, target) {
        (
            Obligation::IndexOwnedBy,
            Some(SchemaRule::Index {
                owning_constraint, ..
            }),
        ) => *owning_constraint == Some(source),
        (
            Obligation::ConstraintOwning,
            Some(SchemaRule::UniquenessConstraint { owned_index, .. }),
        ) => *owned_index == source,
        _ => false,
    }
}
