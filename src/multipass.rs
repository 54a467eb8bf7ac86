//! Multi-pass filtering.
//!
//! Node and relationship stores are scanned once per window of the property id
//! range. During a window the record access resolves only property ids inside
//! it and skips every other reference, so each pass checks a bounded slice of
//! the property store while the outer store is streamed again.

use std::ops::Range;
use std::sync::Arc;

use crate::check::decorate::PropertyOwner;
use crate::check::{checker, CheckContext, Checker};
use crate::error::Result;
use crate::record::PropertyRecord;
use crate::report::Finding;
use crate::store::StoreAccess;
use crate::types::NONE;

/// Store streamed once per property window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MultiPassStore {
    Nodes,
    Relationships,
}

impl MultiPassStore {
    /// Splits `0..high_id` into consecutive windows of at most `per_pass` ids.
    ///
    /// An empty store still gets one empty window so the pass runs once.
    pub fn windows(high_id: u64, per_pass: u64) -> Vec<Range<u64>> {
        let per_pass = per_pass.max(1);
        if high_id == 0 {
            return vec![0..0];
        }
        (0..high_id.div_ceil(per_pass))
            .map(|pass| {
                let start = pass * per_pass;
                start..(start + per_pass).min(high_id)
            })
            .collect()
    }
}

/// Outcome of resolving a reference through a filtered access.
#[derive(Debug, PartialEq)]
pub enum Access<R> {
    /// The id falls in the active window; `None` when the record is not in use.
    Resolved(Option<R>),
    /// The id belongs to another pass.
    Skipped,
}

/// Property access that resolves only ids inside one window.
pub struct FilteringRecordAccess<'a> {
    stores: &'a StoreAccess,
    window: Range<u64>,
}

impl<'a> FilteringRecordAccess<'a> {
    pub fn new(stores: &'a StoreAccess, window: Range<u64>) -> Self {
        Self { stores, window }
    }

    /// Whether a reference to property `id` is resolved by this pass.
    pub fn resolves(&self, id: u64) -> bool {
        id != NONE && self.window.contains(&id)
    }

    pub fn property(&self, id: u64) -> Result<Access<PropertyRecord>> {
        if !self.resolves(id) {
            return Ok(Access::Skipped);
        }
        let properties = self.stores.properties.as_ref();
        if id >= properties.high_id() {
            return Ok(Access::Resolved(None));
        }
        Ok(Access::Resolved(properties.get(id)?.filter(|record| record.in_use)))
    }
}

/// Checks that an owner's first property lies on a chain head, for heads
/// inside `window` only.
pub fn property_heads_in<R: PropertyOwner>(window: Range<u64>) -> Checker<R> {
    let window = Arc::new(window);
    checker(move |record: &R, ctx: &CheckContext<'_>| {
        let target = record.next_prop();
        if !record.in_use() || target == NONE {
            return Ok(Vec::new());
        }
        let access = FilteringRecordAccess::new(ctx.stores, (*window).clone());
        let report = |message: String| vec![Finding::error(R::RECORD_TYPE, record.id(), message)];
        Ok(match access.property(target)? {
            Access::Skipped => Vec::new(),
            Access::Resolved(None) => report(format!("first property {target} is not in use")),
            Access::Resolved(Some(property)) if property.prev_prop != NONE => report(format!(
                "first property {target} is not a chain head, its previous record is {}",
                property.prev_prop
            )),
            Access::Resolved(Some(_)) => Vec::new(),
        })
    })
}
