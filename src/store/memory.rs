use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::aggregate::counts::CountsKey;
use crate::error::{CheckError, Result};
use crate::record::Record;

use super::{CountsStore, IndexAccessor, IndexEntry, RecordIter, RecordStore, StructureCheck};

const RECORDS_PER_PAGE: u64 = 64;

/// Vector-backed store, indexed by record id.
///
/// Slots without a record are skipped by scans. Read and close failures can be
/// injected to exercise the fatal-error paths.
pub struct MemoryStore<R> {
    name: String,
    slots: Vec<Option<R>>,
    fail_scan_at: Option<u64>,
    fail_close: bool,
    pages_touched: AtomicU64,
    closed: AtomicBool,
}

impl<R: Record> MemoryStore<R> {
    pub fn new(name: impl Into<String>, records: Vec<R>) -> Self {
        let high_id = records.iter().map(|r| r.id() + 1).max().unwrap_or(0);
        let mut slots: Vec<Option<R>> = (0..high_id).map(|_| None).collect();
        for record in records {
            let id = record.id() as usize;
            slots[id] = Some(record);
        }
        Self {
            name: name.into(),
            slots,
            fail_scan_at: None,
            fail_close: false,
            pages_touched: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Makes scans fail when they reach `id`.
    pub fn fail_scan_at(mut self, id: u64) -> Self {
        self.fail_scan_at = Some(id);
        self
    }

    /// Makes `close` fail.
    pub fn fail_on_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn pages_touched(&self) -> u64 {
        self.pages_touched.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn slot(&self, id: u64) -> Result<Option<R>> {
        if self.fail_scan_at == Some(id) {
            return Err(CheckError::store(
                &self.name,
                format!("injected read failure at record {id}"),
            ));
        }
        Ok(self.slots.get(id as usize).and_then(|slot| slot.clone()))
    }
}

impl<R: Record> RecordStore<R> for MemoryStore<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn high_id(&self) -> u64 {
        self.slots.len() as u64
    }

    fn get(&self, id: u64) -> Result<Option<R>> {
        self.slot(id)
    }

    fn scan(&self, forward: bool) -> RecordIter<'_, R> {
        let high_id = self.high_id();
        let ids: Box<dyn Iterator<Item = u64>> = if forward {
            Box::new(0..high_id)
        } else {
            Box::new((0..high_id).rev())
        };
        Box::new(ids.filter_map(move |id| self.slot(id).transpose()))
    }

    fn page_count(&self) -> u64 {
        self.high_id().div_ceil(RECORDS_PER_PAGE)
    }

    fn touch_page(&self, _page: u64) -> Result<()> {
        self.pages_touched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if self.fail_close {
            return Err(CheckError::store(&self.name, "injected close failure"));
        }
        Ok(())
    }
}

/// Counts store held in memory; `missing()` simulates an absent store.
pub struct MemoryCounts {
    entries: Option<Vec<(CountsKey, u64)>>,
}

impl MemoryCounts {
    pub fn new(entries: Vec<(CountsKey, u64)>) -> Self {
        Self {
            entries: Some(entries),
        }
    }

    pub fn missing() -> Self {
        Self { entries: None }
    }
}

impl CountsStore for MemoryCounts {
    fn name(&self) -> &str {
        "counts"
    }

    fn entries(&self) -> Result<Vec<(CountsKey, u64)>> {
        self.entries
            .clone()
            .ok_or_else(|| CheckError::store("counts", "counts store is missing"))
    }
}

/// Schema index held in memory.
pub struct MemoryIndex {
    rule_id: u64,
    name: String,
    entries: Vec<IndexEntry>,
    structure_problems: Vec<String>,
}

impl MemoryIndex {
    pub fn new(rule_id: u64, entries: Vec<IndexEntry>) -> Self {
        Self {
            rule_id,
            name: format!("index-{rule_id}"),
            entries,
            structure_problems: Vec::new(),
        }
    }

    /// Reports `problem` from structural verification.
    pub fn corrupt(mut self, problem: impl Into<String>) -> Self {
        self.structure_problems.push(problem.into());
        self
    }
}

impl IndexAccessor for MemoryIndex {
    fn rule_id(&self) -> u64 {
        self.rule_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn verify_structure(&self) -> Result<Vec<String>> {
        Ok(self.structure_problems.clone())
    }

    fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self.entries.clone())
    }
}

/// Structure check with a scripted outcome.
pub struct FailingStructure {
    name: String,
    outcome: std::result::Result<Vec<String>, String>,
}

impl FailingStructure {
    /// A check that completes and reports `problems`.
    pub fn reporting(name: impl Into<String>, problems: Vec<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Ok(problems),
        }
    }

    /// A check that cannot complete.
    pub fn broken(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: Err(message.into()),
        }
    }
}

impl StructureCheck for FailingStructure {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<Vec<String>> {
        self.outcome
            .clone()
            .map_err(|message| CheckError::store(&self.name, message))
    }
}
