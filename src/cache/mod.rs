//! Id-addressed scratch cache used to pass facts between stages.
//!
//! The cache holds one fixed-width group of `u64` units per record id. The
//! active [`SlotLayout`] decides how wide a group is and what each slot means.
//! Installing a layout takes `&mut self`, so it can only happen while no
//! worker holds a [`CacheClient`]; that is the stage barrier.
//!
//! Reads and writes are plain relaxed atomic loads and stores. There is no
//! locking: within a stage that both reads and writes a record's slots, the
//! distribution policy guarantees only one worker ever addresses that record.

mod ordinals;

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::debug;

use crate::error::{CheckError, Result};

pub use ordinals::{FirstTouchGate, GateState, ThreadOrdinals};

/// Widths, in cache units, of the slots making up one record's group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotLayout {
    sizes: SmallVec<[u32; 4]>,
    offsets: SmallVec<[u32; 4]>,
    width: u32,
}

impl SlotLayout {
    pub fn new(sizes: &[u32]) -> Self {
        let mut offsets = SmallVec::with_capacity(sizes.len());
        let mut width = 0u32;
        for size in sizes {
            offsets.push(width);
            width += size;
        }
        Self {
            sizes: SmallVec::from_slice(sizes),
            offsets,
            width,
        }
    }

    /// Layout with no slots, installed between stages.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Units per record.
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }
}

/// Shared per-record scratch space.
pub struct CacheStore {
    units: Vec<AtomicU64>,
    layout: SlotLayout,
    high_id: u64,
    forward: bool,
    ordinals: ThreadOrdinals,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            layout: SlotLayout::neutral(),
            high_id: 0,
            forward: true,
            ordinals: ThreadOrdinals::new(),
        }
    }

    /// Installs `layout` for `high_id` records and clears every unit.
    ///
    /// Also forgets the thread ordinals of the previous stage, whose workers
    /// have all been joined by the time this can be called.
    pub fn prepare_for_processing_of_single_store(&mut self, high_id: u64, layout: SlotLayout) {
        let needed = (high_id as usize).saturating_mul(layout.width() as usize);
        if needed > self.units.len() {
            self.units.resize_with(needed, || AtomicU64::new(0));
        }
        for unit in &mut self.units[..needed] {
            *unit.get_mut() = 0;
        }
        debug!(
            high_id,
            slots = layout.len(),
            width = layout.width(),
            "check.cache.layout_installed"
        );
        self.high_id = high_id;
        self.layout = layout;
        self.ordinals.reset();
    }

    /// Installs `sizes` keeping the current high id.
    pub fn set_layout(&mut self, sizes: &[u32]) {
        let high_id = self.high_id;
        self.prepare_for_processing_of_single_store(high_id, SlotLayout::new(sizes));
    }

    /// Drops back to the neutral layout and releases the backing memory.
    pub fn reset(&mut self) {
        self.units = Vec::new();
        self.layout = SlotLayout::neutral();
        self.high_id = 0;
        self.forward = true;
        self.ordinals.reset();
    }

    pub fn set_forward(&mut self, forward: bool) {
        self.forward = forward;
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn layout(&self) -> &SlotLayout {
        &self.layout
    }

    pub fn high_id(&self) -> u64 {
        self.high_id
    }

    /// Client for the calling thread.
    ///
    /// The first call from a thread assigns it the next zero-based ordinal;
    /// later calls from the same thread return a client with the same ordinal.
    pub fn client(&self) -> CacheClient<'_> {
        CacheClient {
            cache: self,
            ordinal: self.ordinals.ordinal(),
        }
    }

    /// Number of threads that have obtained a client since the last layout change.
    pub fn registered_clients(&self) -> usize {
        self.ordinals.len()
    }

    /// Forgets every thread ordinal so the next pool starts again at zero.
    ///
    /// Must only be called while no worker holds a client.
    pub(crate) fn release_clients(&self) {
        self.ordinals.reset();
    }

    fn index(&self, id: u64, slot: usize) -> Result<usize> {
        if slot >= self.layout.len() {
            return Err(CheckError::invariant(format!(
                "cache slot {slot} outside layout of {} slots",
                self.layout.len()
            )));
        }
        if id >= self.high_id {
            return Err(CheckError::invariant(format!(
                "cache id {id} beyond high id {}",
                self.high_id
            )));
        }
        let base = id as usize * self.layout.width() as usize;
        Ok(base + self.layout.offsets[slot] as usize)
    }
}

/// Per-thread handle for reading and writing cache units.
#[derive(Clone, Copy)]
pub struct CacheClient<'a> {
    cache: &'a CacheStore,
    ordinal: usize,
}

impl<'a> CacheClient<'a> {
    /// Zero-based ordinal of the owning thread.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn put(&self, id: u64, slot: usize, value: u64) -> Result<()> {
        let index = self.cache.index(id, slot)?;
        self.cache.units[index].store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, id: u64, slot: usize) -> Result<u64> {
        let index = self.cache.index(id, slot)?;
        Ok(self.cache.units[index].load(Ordering::Relaxed))
    }

    pub fn put_flag(&self, id: u64, slot: usize, flag: bool) -> Result<()> {
        self.put(id, slot, u64::from(flag))
    }

    pub fn get_flag(&self, id: u64, slot: usize) -> Result<bool> {
        Ok(self.get(id, slot)? != 0)
    }

    pub fn is_forward(&self) -> bool {
        self.cache.is_forward()
    }

    /// Whether `id` falls inside the active cache range.
    pub fn covers(&self, id: u64) -> bool {
        id < self.cache.high_id
    }
}
