//! Physical record model consumed by the checker.
//!
//! These are read-only views of the host store's fixed and variable-length
//! records. The checker never constructs them itself except in tests.

use smallvec::{smallvec, SmallVec};

use crate::types::{LabelId, PropKeyId, RecordType, RelTypeId, NONE};

/// Common surface of every record the scanners move around.
pub trait Record: Clone + Send + Sync + 'static {
    /// Record id within its store.
    fn id(&self) -> u64;

    /// Whether the record slot is in use.
    fn in_use(&self) -> bool;

    /// Ids used to pick a worker partition. Most records have exactly one.
    fn natural_ids(&self) -> SmallVec<[u64; 2]> {
        smallvec![self.id()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: u64,
    pub in_use: bool,
    /// Dense nodes point at a relationship group chain instead of a relationship.
    pub dense: bool,
    pub next_rel: u64,
    pub next_prop: u64,
    pub labels: Vec<LabelId>,
}

impl NodeRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            dense: false,
            next_rel: NONE,
            next_prop: NONE,
            labels: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[u32]) -> Self {
        self.labels = labels.iter().copied().map(LabelId).collect();
        self
    }

    pub fn with_next_rel(mut self, rel: u64) -> Self {
        self.next_rel = rel;
        self
    }

    pub fn with_next_prop(mut self, prop: u64) -> Self {
        self.next_prop = prop;
        self
    }

    pub fn dense(mut self) -> Self {
        self.dense = true;
        self
    }

    pub fn unused(mut self) -> Self {
        self.in_use = false;
        self
    }
}

impl Record for NodeRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipRecord {
    pub id: u64,
    pub in_use: bool,
    pub first_node: u64,
    pub second_node: u64,
    pub rel_type: RelTypeId,
    pub first_prev_rel: u64,
    pub first_next_rel: u64,
    pub second_prev_rel: u64,
    pub second_next_rel: u64,
    pub first_in_first_chain: bool,
    pub first_in_second_chain: bool,
    pub next_prop: u64,
}

impl RelationshipRecord {
    /// An in-use relationship that is alone in both endpoint chains.
    pub fn new(id: u64, first_node: u64, second_node: u64, rel_type: u32) -> Self {
        Self {
            id,
            in_use: true,
            first_node,
            second_node,
            rel_type: RelTypeId(rel_type),
            first_prev_rel: NONE,
            first_next_rel: NONE,
            second_prev_rel: NONE,
            second_next_rel: NONE,
            first_in_first_chain: true,
            first_in_second_chain: true,
            next_prop: NONE,
        }
    }

    pub fn with_next_prop(mut self, prop: u64) -> Self {
        self.next_prop = prop;
        self
    }

    pub fn unused(mut self) -> Self {
        self.in_use = false;
        self
    }

    /// Previous relationship in `node`'s chain.
    pub fn prev_for(&self, node: u64) -> u64 {
        if node == self.first_node {
            self.first_prev_rel
        } else {
            self.second_prev_rel
        }
    }

    /// Next relationship in `node`'s chain.
    pub fn next_for(&self, node: u64) -> u64 {
        if node == self.first_node {
            self.first_next_rel
        } else {
            self.second_next_rel
        }
    }

    /// Whether this relationship heads `node`'s chain.
    pub fn is_first_for(&self, node: u64) -> bool {
        if node == self.first_node {
            self.first_in_first_chain
        } else {
            self.first_in_second_chain
        }
    }

    /// Both endpoints, deduplicated for self-loops.
    pub fn endpoints(&self) -> SmallVec<[u64; 2]> {
        if self.first_node == self.second_node {
            smallvec![self.first_node]
        } else {
            smallvec![self.first_node, self.second_node]
        }
    }
}

impl Record for RelationshipRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn natural_ids(&self) -> SmallVec<[u64; 2]> {
        smallvec![self.first_node, self.second_node]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipGroupRecord {
    pub id: u64,
    pub in_use: bool,
    pub rel_type: RelTypeId,
    pub owner: u64,
    pub next: u64,
    pub first_out: u64,
    pub first_in: u64,
    pub first_loop: u64,
}

impl RelationshipGroupRecord {
    pub fn new(id: u64, owner: u64, rel_type: u32) -> Self {
        Self {
            id,
            in_use: true,
            rel_type: RelTypeId(rel_type),
            owner,
            next: NONE,
            first_out: NONE,
            first_in: NONE,
            first_loop: NONE,
        }
    }
}

impl Record for RelationshipGroupRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

/// Value stored in a property block.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Bool(bool),
    Float(f64),
    /// Head of a dynamic string chain.
    String(u64),
    /// Head of a dynamic array chain.
    Array(u64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyBlock {
    pub key: PropKeyId,
    pub value: PropertyValue,
}

impl PropertyBlock {
    pub fn new(key: u32, value: PropertyValue) -> Self {
        Self {
            key: PropKeyId(key),
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropertyRecord {
    pub id: u64,
    pub in_use: bool,
    pub prev_prop: u64,
    pub next_prop: u64,
    pub blocks: Vec<PropertyBlock>,
}

impl PropertyRecord {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            prev_prop: NONE,
            next_prop: NONE,
            blocks: Vec::new(),
        }
    }

    pub fn with_block(mut self, key: u32, value: PropertyValue) -> Self {
        self.blocks.push(PropertyBlock::new(key, value));
        self
    }

    pub fn linked(mut self, prev: u64, next: u64) -> Self {
        self.prev_prop = prev;
        self.next_prop = next;
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = PropKeyId> + '_ {
        self.blocks.iter().map(|block| block.key)
    }
}

impl Record for PropertyRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

/// Payload capacity of one dynamic block.
pub const DYNAMIC_BLOCK_CAPACITY: u32 = 120;

/// One fragment of a string, array, or token-name chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicRecord {
    pub id: u64,
    pub in_use: bool,
    pub next_block: u64,
    pub length: u32,
}

impl DynamicRecord {
    pub fn new(id: u64, length: u32) -> Self {
        Self {
            id,
            in_use: true,
            next_block: NONE,
            length,
        }
    }

    pub fn with_next(mut self, next: u64) -> Self {
        self.next_block = next;
        self
    }
}

impl Record for DynamicRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Label,
    RelationshipType,
    PropertyKey,
}

impl TokenKind {
    pub fn record_type(self) -> RecordType {
        match self {
            TokenKind::Label => RecordType::LabelToken,
            TokenKind::RelationshipType => RecordType::RelationshipTypeToken,
            TokenKind::PropertyKey => RecordType::PropertyKeyToken,
        }
    }
}

/// A label, relationship-type or property-key token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: u64,
    pub in_use: bool,
    pub kind: TokenKind,
    /// Head of the dynamic name chain.
    pub name_id: u64,
}

impl TokenRecord {
    pub fn new(id: u64, kind: TokenKind, name_id: u64) -> Self {
        Self {
            id,
            in_use: true,
            kind,
            name_id,
        }
    }
}

impl Record for TokenRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaRule {
    Index {
        label: LabelId,
        keys: Vec<PropKeyId>,
        unique: bool,
        /// Constraint rule owning this index, for constraint-backing indexes.
        owning_constraint: Option<u64>,
    },
    UniquenessConstraint {
        label: LabelId,
        keys: Vec<PropKeyId>,
        /// Index rule backing the constraint.
        owned_index: u64,
    },
    NodePropertyExistence {
        label: LabelId,
        key: PropKeyId,
    },
    RelationshipPropertyExistence {
        rel_type: RelTypeId,
        key: PropKeyId,
    },
}

impl SchemaRule {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaRule::Index { .. } => "index",
            SchemaRule::UniquenessConstraint { .. } => "uniqueness_constraint",
            SchemaRule::NodePropertyExistence { .. } => "node_property_existence",
            SchemaRule::RelationshipPropertyExistence { .. } => "relationship_property_existence",
        }
    }

    /// Rule payload without ids, used to detect duplicated rule content.
    pub(crate) fn content_key(&self) -> String {
        match self {
            SchemaRule::Index {
                label, keys, unique, ..
            } => format!("index:{}:{:?}:{}", label.0, keys, unique),
            SchemaRule::UniquenessConstraint { label, keys, .. } => {
                format!("unique:{}:{:?}", label.0, keys)
            }
            SchemaRule::NodePropertyExistence { label, key } => {
                format!("node_exists:{}:{}", label.0, key.0)
            }
            SchemaRule::RelationshipPropertyExistence { rel_type, key } => {
                format!("rel_exists:{}:{}", rel_type.0, key.0)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaRecord {
    pub id: u64,
    pub in_use: bool,
    /// Head of the dynamic chain holding the serialized rule.
    pub first_block: u64,
    /// `None` when the rule could not be deserialized.
    pub rule: Option<SchemaRule>,
}

impl SchemaRecord {
    pub fn new(id: u64, rule: SchemaRule) -> Self {
        Self {
            id,
            in_use: true,
            first_block: NONE,
            rule: Some(rule),
        }
    }
}

impl Record for SchemaRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }
}

/// Maximum number of labels packed inline into one cache unit.
const INLINE_LABELS: usize = 3;
const LABEL_BITS: u32 = 20;
const LABEL_MASK: u64 = (1 << LABEL_BITS) - 1;

/// Packed label snapshot stored in a single cache unit.
///
/// Up to three labels below 2^20 fit inline; anything else packs to
/// [`LabelField::SPILLED`] and readers must load the node record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LabelField(pub u64);

impl LabelField {
    pub const SPILLED: LabelField = LabelField(u64::MAX);

    pub fn pack(labels: &[LabelId]) -> LabelField {
        if labels.len() > INLINE_LABELS || labels.iter().any(|l| u64::from(l.0) > LABEL_MASK) {
            return LabelField::SPILLED;
        }
        let mut raw = (labels.len() as u64) << 60;
        for (i, label) in labels.iter().enumerate() {
            raw |= u64::from(label.0) << (LABEL_BITS * i as u32);
        }
        LabelField(raw)
    }

    /// Inline labels, or `None` when the field spilled.
    pub fn unpack(self) -> Option<SmallVec<[LabelId; 3]>> {
        if self == LabelField::SPILLED {
            return None;
        }
        let count = (self.0 >> 60) as usize;
        Some(
            (0..count.min(INLINE_LABELS))
                .map(|i| LabelId(((self.0 >> (LABEL_BITS * i as u32)) & LABEL_MASK) as u32))
                .collect(),
        )
    }
}
