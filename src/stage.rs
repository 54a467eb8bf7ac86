//! The fixed, ordered stages of a full check.

use std::fmt;

use serde::Serialize;

/// One phase of the check, with its direction, parallelism and cache layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    NodeLabels,
    RelationshipCounts,
    NodeNextRel,
    RelationshipNodes,
    NodeNextRelCheck,
    RelationshipChainForward,
    RelationshipChainBackward,
    RelationshipGroups,
    Properties,
    Dynamics,
    Schema,
    Tokens,
    ScanStores,
    Structures,
    Indexes,
}

/// Cache slots of [`CheckStage::NodeLabels`] and [`CheckStage::RelationshipCounts`].
pub mod label_slots {
    pub const IN_USE: usize = 0;
    pub const LABELS: usize = 1;
}

/// Cache slots of the three next-relationship stages.
pub mod next_rel_slots {
    pub const IN_USE: usize = 0;
    /// First relationship, or first group for dense nodes.
    pub const NEXT_REL: usize = 1;
    /// Set once a relationship marked first in the node's chain was seen.
    pub const FIRST_SEEN: usize = 2;
    pub const DENSE: usize = 3;
}

/// Cache slots of the two chain-scan stages.
pub mod chain_slots {
    /// Relationship id the pending link points at, plus one; zero when idle.
    pub const EXPECTED: usize = 0;
    /// Relationship the pending link starts from.
    pub const REFERRER: usize = 1;
}

impl CheckStage {
    pub const ALL: [CheckStage; 15] = [
        CheckStage::NodeLabels,
        CheckStage::RelationshipCounts,
        CheckStage::NodeNextRel,
        CheckStage::RelationshipNodes,
        CheckStage::NodeNextRelCheck,
        CheckStage::RelationshipChainForward,
        CheckStage::RelationshipChainBackward,
        CheckStage::RelationshipGroups,
        CheckStage::Properties,
        CheckStage::Dynamics,
        CheckStage::Schema,
        CheckStage::Tokens,
        CheckStage::ScanStores,
        CheckStage::Structures,
        CheckStage::Indexes,
    ];

    /// One-based position in the run.
    pub fn ordinal(self) -> usize {
        self as usize + 1
    }

    pub fn purpose(self) -> &'static str {
        match self {
            CheckStage::NodeLabels => "node store pass: check nodes, cache labels, count nodes",
            CheckStage::RelationshipCounts => {
                "relationship store pass: count relationships using cached labels"
            }
            CheckStage::NodeNextRel => "node store pass: cache in-use flag and next relationship",
            CheckStage::RelationshipNodes => {
                "relationship store pass: check endpoint nodes and first-in-chain flags"
            }
            CheckStage::NodeNextRelCheck => {
                "node store pass: check next relationship against first-in-chain flags"
            }
            CheckStage::RelationshipChainForward => {
                "relationship store pass: forward scan of endpoint chains"
            }
            CheckStage::RelationshipChainBackward => {
                "relationship store pass: backward scan of endpoint chains"
            }
            CheckStage::RelationshipGroups => "relationship group store pass",
            CheckStage::Properties => {
                "property store pass, node to label index check and property references"
            }
            CheckStage::Dynamics => "string and array store passes",
            CheckStage::Schema => "schema store passes: chains, rules, obligations",
            CheckStage::Tokens => "token store and token name passes",
            CheckStage::ScanStores => "label and relationship type scan store passes",
            CheckStage::Structures => "physical structure checks",
            CheckStage::Indexes => "schema index structure and content checks",
        }
    }

    pub fn parallel(self) -> bool {
        !matches!(
            self,
            CheckStage::Schema | CheckStage::Structures | CheckStage::Indexes
        )
    }

    /// Scan direction over the store.
    pub fn forward(self) -> bool {
        self != CheckStage::RelationshipChainBackward
    }

    /// Widths in cache units of the slots this stage uses.
    pub fn cache_slot_sizes(self) -> &'static [u32] {
        match self {
            CheckStage::NodeLabels | CheckStage::RelationshipCounts => &[1, 1],
            CheckStage::NodeNextRel
            | CheckStage::RelationshipNodes
            | CheckStage::NodeNextRelCheck => &[1, 1, 1, 1],
            CheckStage::RelationshipChainForward | CheckStage::RelationshipChainBackward => {
                &[1, 1]
            }
            _ => &[],
        }
    }

    /// Whether the stage reads what the previous stage left in the cache.
    ///
    /// Such a stage keeps the previous layout and contents instead of
    /// installing a fresh one.
    pub fn inherits_cache(self) -> bool {
        matches!(
            self,
            CheckStage::RelationshipCounts
                | CheckStage::RelationshipNodes
                | CheckStage::NodeNextRelCheck
        )
    }

    /// Whether the cache is sized by the node store for this stage.
    pub fn node_keyed_cache(self) -> bool {
        !self.cache_slot_sizes().is_empty()
    }
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({:?})", self.ordinal(), self)
    }
}
