//! Record checkers and their composition.
//!
//! A checker is a plain function from a record to findings. Decorators in
//! [`decorate`] wrap a checker and feed the cross-pass aggregators as a side
//! effect; [`cached`] holds the checkers that talk to other stages through the
//! cache. Tasks compose what they need when they are planned.

pub mod builtin;
pub mod cached;
pub mod decorate;
pub mod index;
pub mod schema;

use std::sync::Arc;

use crate::aggregate::OwnerDomain;
use crate::error::Result;
use crate::pool::WorkerContext;
use crate::record::{
    DynamicRecord, NodeRecord, PropertyRecord, Record, RelationshipGroupRecord,
    RelationshipRecord, SchemaRecord, TokenRecord,
};
use crate::report::Finding;
use crate::store::StoreAccess;

/// Everything a checker may consult besides the record.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub stores: &'a StoreAccess,
    pub worker: WorkerContext<'a>,
}

impl<'a> CheckContext<'a> {
    pub fn new(stores: &'a StoreAccess, worker: WorkerContext<'a>) -> Self {
        Self { stores, worker }
    }
}

/// Shared, composable record check.
pub type Checker<R> = Arc<dyn Fn(&R, &CheckContext<'_>) -> Result<Vec<Finding>> + Send + Sync>;

pub fn checker<R, F>(f: F) -> Checker<R>
where
    F: Fn(&R, &CheckContext<'_>) -> Result<Vec<Finding>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Checker that never finds anything.
pub fn noop<R: 'static>() -> Checker<R> {
    checker(|_: &R, _: &CheckContext<'_>| Ok(Vec::new()))
}

/// Runs `first`, then `second`, concatenating their findings.
pub fn chain<R: 'static>(first: Checker<R>, second: Checker<R>) -> Checker<R> {
    checker(move |record: &R, ctx: &CheckContext<'_>| {
        let mut findings = first(record, ctx)?;
        findings.extend(second(record, ctx)?);
        Ok(findings)
    })
}

/// Runs `inner` only for records in use.
pub fn in_use_only<R: Record>(inner: Checker<R>) -> Checker<R> {
    checker(move |record: &R, ctx: &CheckContext<'_>| {
        if record.in_use() {
            inner(record, ctx)
        } else {
            Ok(Vec::new())
        }
    })
}

/// The base structural check for each record kind.
///
/// Defaults to the built-in rules; any entry can be replaced before planning.
#[derive(Clone)]
pub struct RecordChecks {
    pub node: Checker<NodeRecord>,
    pub relationship: Checker<RelationshipRecord>,
    pub group: Checker<RelationshipGroupRecord>,
    pub property: Checker<PropertyRecord>,
    /// Builds the check for the dynamic store of a domain.
    pub dynamic: fn(OwnerDomain) -> Checker<DynamicRecord>,
    pub token: Checker<TokenRecord>,
    pub schema: Checker<SchemaRecord>,
}

impl Default for RecordChecks {
    fn default() -> Self {
        Self {
            node: in_use_only(checker(builtin::node)),
            relationship: in_use_only(checker(builtin::relationship)),
            group: in_use_only(checker(builtin::group)),
            property: in_use_only(checker(builtin::property)),
            dynamic: builtin::dynamic,
            token: in_use_only(checker(builtin::token)),
            schema: in_use_only(checker(builtin::schema)),
        }
    }
}

impl RecordChecks {
    /// Every base check disabled; passes still drive caches and aggregators.
    pub fn none() -> Self {
        Self {
            node: noop(),
            relationship: noop(),
            group: noop(),
            property: noop(),
            dynamic: |_| noop(),
            token: noop(),
            schema: noop(),
        }
    }
}
