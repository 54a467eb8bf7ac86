//! Store abstractions the checker reads through.
//!
//! The checker owns none of the on-disk formats. Every physical store is reached
//! through [`RecordStore`], and the auxiliary structures (counts, scan stores,
//! schema indexes, id generators) through their own narrow traits.

mod memory;

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::aggregate::counts::CountsKey;
use crate::aggregate::OwnerDomain;
use crate::error::Result;
use crate::record::{
    DynamicRecord, NodeRecord, PropertyRecord, Record, RelationshipGroupRecord,
    RelationshipRecord, SchemaRecord, TokenKind, TokenRecord,
};

pub use memory::{FailingStructure, MemoryCounts, MemoryIndex, MemoryStore};

/// Boxed record iterator handed out by a store scan.
pub type RecordIter<'a, R> = Box<dyn Iterator<Item = Result<R>> + 'a>;

/// Read-only access to one physical store.
pub trait RecordStore<R: Record>: Send + Sync {
    /// Store name used in logs and error context.
    fn name(&self) -> &str;

    /// One past the highest id ever allocated.
    fn high_id(&self) -> u64;

    /// Loads record `id`, or `None` when no record occupies that slot.
    fn get(&self, id: u64) -> Result<Option<R>>;

    /// Iterates every record slot in id order, ascending when `forward`.
    fn scan(&self, forward: bool) -> RecordIter<'_, R>;

    /// Number of pages backing the store.
    fn page_count(&self) -> u64 {
        0
    }

    /// Faults page `page` into the OS page cache.
    fn touch_page(&self, _page: u64) -> Result<()> {
        Ok(())
    }

    /// Releases resources held for scanning.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Entity id with the tokens a scan store holds for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenScanEntry {
    pub entity: u64,
    pub tokens: Vec<u32>,
}

impl Record for TokenScanEntry {
    fn id(&self) -> u64 {
        self.entity
    }

    fn in_use(&self) -> bool {
        true
    }

    fn natural_ids(&self) -> SmallVec<[u64; 2]> {
        smallvec![self.entity]
    }
}

/// Persisted aggregate counts.
pub trait CountsStore: Send + Sync {
    fn name(&self) -> &str;

    /// Every persisted entry. An error means the store is missing or unreadable.
    fn entries(&self) -> Result<Vec<(CountsKey, u64)>>;
}

/// One entry of a schema index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub node: u64,
    pub value: Vec<u8>,
}

/// Accessor for one schema index.
pub trait IndexAccessor: Send + Sync {
    /// Schema rule id this index belongs to.
    fn rule_id(&self) -> u64;

    fn name(&self) -> &str;

    /// Structural problems found in the index, empty when sound.
    fn verify_structure(&self) -> Result<Vec<String>>;

    fn entries(&self) -> Result<Vec<IndexEntry>>;
}

/// Physical-structure check of a non-schema-index store.
pub trait StructureCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Problems found; an `Err` means the check itself could not complete.
    fn check(&self) -> Result<Vec<String>>;
}

/// Every store a run may touch.
#[derive(Clone)]
pub struct StoreAccess {
    pub nodes: Arc<dyn RecordStore<NodeRecord>>,
    pub relationships: Arc<dyn RecordStore<RelationshipRecord>>,
    pub groups: Arc<dyn RecordStore<RelationshipGroupRecord>>,
    pub properties: Arc<dyn RecordStore<PropertyRecord>>,
    pub strings: Arc<dyn RecordStore<DynamicRecord>>,
    pub arrays: Arc<dyn RecordStore<DynamicRecord>>,
    pub schema: Arc<dyn RecordStore<SchemaRecord>>,
    pub relationship_types: Arc<dyn RecordStore<TokenRecord>>,
    pub property_keys: Arc<dyn RecordStore<TokenRecord>>,
    pub labels: Arc<dyn RecordStore<TokenRecord>>,
    pub relationship_type_names: Arc<dyn RecordStore<DynamicRecord>>,
    pub property_key_names: Arc<dyn RecordStore<DynamicRecord>>,
    pub label_names: Arc<dyn RecordStore<DynamicRecord>>,
    pub counts: Option<Arc<dyn CountsStore>>,
    pub label_scan: Option<Arc<dyn RecordStore<TokenScanEntry>>>,
    pub type_scan: Option<Arc<dyn RecordStore<TokenScanEntry>>>,
    pub indexes: Vec<Arc<dyn IndexAccessor>>,
    pub structures: Vec<Arc<dyn StructureCheck>>,
}

impl StoreAccess {
    /// Empty in-memory stores, to be filled with the `with_*` setters.
    pub fn in_memory() -> Self {
        Self {
            nodes: Arc::new(MemoryStore::new("nodes", Vec::new())),
            relationships: Arc::new(MemoryStore::new("relationships", Vec::new())),
            groups: Arc::new(MemoryStore::new("relationship_groups", Vec::new())),
            properties: Arc::new(MemoryStore::new("properties", Vec::new())),
            strings: Arc::new(MemoryStore::new("strings", Vec::new())),
            arrays: Arc::new(MemoryStore::new("arrays", Vec::new())),
            schema: Arc::new(MemoryStore::new("schema", Vec::new())),
            relationship_types: Arc::new(MemoryStore::new("relationship_types", Vec::new())),
            property_keys: Arc::new(MemoryStore::new("property_keys", Vec::new())),
            labels: Arc::new(MemoryStore::new("labels", Vec::new())),
            relationship_type_names: Arc::new(MemoryStore::new(
                "relationship_type_names",
                Vec::new(),
            )),
            property_key_names: Arc::new(MemoryStore::new("property_key_names", Vec::new())),
            label_names: Arc::new(MemoryStore::new("label_names", Vec::new())),
            counts: None,
            label_scan: None,
            type_scan: None,
            indexes: Vec::new(),
            structures: Vec::new(),
        }
    }

    /// Dynamic store holding the chains of `domain`; `None` for properties.
    pub fn dynamic(&self, domain: OwnerDomain) -> Option<&Arc<dyn RecordStore<DynamicRecord>>> {
        match domain {
            OwnerDomain::Property => None,
            OwnerDomain::String => Some(&self.strings),
            OwnerDomain::Array => Some(&self.arrays),
            OwnerDomain::LabelName => Some(&self.label_names),
            OwnerDomain::RelationshipTypeName => Some(&self.relationship_type_names),
            OwnerDomain::PropertyKeyName => Some(&self.property_key_names),
        }
    }

    pub fn tokens(&self, kind: TokenKind) -> &Arc<dyn RecordStore<TokenRecord>> {
        match kind {
            TokenKind::Label => &self.labels,
            TokenKind::RelationshipType => &self.relationship_types,
            TokenKind::PropertyKey => &self.property_keys,
        }
    }

    pub fn with_nodes(mut self, records: Vec<NodeRecord>) -> Self {
        self.nodes = Arc::new(MemoryStore::new("nodes", records));
        self
    }

    pub fn with_relationships(mut self, records: Vec<RelationshipRecord>) -> Self {
        self.relationships = Arc::new(MemoryStore::new("relationships", records));
        self
    }

    pub fn with_groups(mut self, records: Vec<RelationshipGroupRecord>) -> Self {
        self.groups = Arc::new(MemoryStore::new("relationship_groups", records));
        self
    }

    pub fn with_properties(mut self, records: Vec<PropertyRecord>) -> Self {
        self.properties = Arc::new(MemoryStore::new("properties", records));
        self
    }

    pub fn with_strings(mut self, records: Vec<DynamicRecord>) -> Self {
        self.strings = Arc::new(MemoryStore::new("strings", records));
        self
    }

    pub fn with_arrays(mut self, records: Vec<DynamicRecord>) -> Self {
        self.arrays = Arc::new(MemoryStore::new("arrays", records));
        self
    }

    pub fn with_schema(mut self, records: Vec<SchemaRecord>) -> Self {
        self.schema = Arc::new(MemoryStore::new("schema", records));
        self
    }

    pub fn with_labels(mut self, tokens: Vec<TokenRecord>, names: Vec<DynamicRecord>) -> Self {
        self.labels = Arc::new(MemoryStore::new("labels", tokens));
        self.label_names = Arc::new(MemoryStore::new("label_names", names));
        self
    }

    pub fn with_relationship_types(
        mut self,
        tokens: Vec<TokenRecord>,
        names: Vec<DynamicRecord>,
    ) -> Self {
        self.relationship_types = Arc::new(MemoryStore::new("relationship_types", tokens));
        self.relationship_type_names =
            Arc::new(MemoryStore::new("relationship_type_names", names));
        self
    }

    pub fn with_property_keys(
        mut self,
        tokens: Vec<TokenRecord>,
        names: Vec<DynamicRecord>,
    ) -> Self {
        self.property_keys = Arc::new(MemoryStore::new("property_keys", tokens));
        self.property_key_names = Arc::new(MemoryStore::new("property_key_names", names));
        self
    }

    pub fn with_counts(mut self, counts: Arc<dyn CountsStore>) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn with_label_scan(mut self, entries: Vec<TokenScanEntry>) -> Self {
        self.label_scan = Some(Arc::new(MemoryStore::new("label_scan", entries)));
        self
    }

    pub fn with_type_scan(mut self, entries: Vec<TokenScanEntry>) -> Self {
        self.type_scan = Some(Arc::new(MemoryStore::new("relationship_type_scan", entries)));
        self
    }

    pub fn with_index(mut self, index: Arc<dyn IndexAccessor>) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_structure(mut self, check: Arc<dyn StructureCheck>) -> Self {
        self.structures.push(check);
        self
    }
}
