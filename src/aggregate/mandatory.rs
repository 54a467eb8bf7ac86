use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::record::SchemaRule;
use crate::report::Finding;
use crate::types::{LabelId, PropKeyId, RecordType, RelTypeId};

/// Property keys existence constraints require, by label and by type.
#[derive(Clone, Debug, Default)]
pub struct MandatoryProperties {
    nodes: FxHashMap<LabelId, BTreeSet<PropKeyId>>,
    relationships: FxHashMap<RelTypeId, BTreeSet<PropKeyId>>,
}

impl MandatoryProperties {
    /// Collects requirements from existence-constraint rules; other rules are ignored.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a SchemaRule>) -> Self {
        let mut mandatory = Self::default();
        for rule in rules {
            match rule {
                SchemaRule::NodePropertyExistence { label, key } => {
                    mandatory.nodes.entry(*label).or_default().insert(*key);
                }
                SchemaRule::RelationshipPropertyExistence { rel_type, key } => {
                    mandatory
                        .relationships
                        .entry(*rel_type)
                        .or_default()
                        .insert(*key);
                }
                _ => {}
            }
        }
        debug!(
            node_labels = mandatory.nodes.len(),
            relationship_types = mandatory.relationships.len(),
            "check.mandatory.loaded"
        );
        mandatory
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn for_node(&self, id: u64, labels: &[LabelId]) -> MandatoryTracker {
        let mut missing = BTreeSet::new();
        for label in labels {
            if let Some(keys) = self.nodes.get(label) {
                missing.extend(keys.iter().copied());
            }
        }
        MandatoryTracker::over(RecordType::Node, id, missing)
    }

    pub fn for_relationship(&self, id: u64, rel_type: RelTypeId) -> MandatoryTracker {
        let missing = self.relationships.get(&rel_type).cloned().unwrap_or_default();
        MandatoryTracker::over(RecordType::Relationship, id, missing)
    }
}

/// Per-record view of the keys still unaccounted for.
#[derive(Debug)]
pub enum MandatoryTracker {
    /// No constraint applies to the record.
    Noop,
    Active {
        record_type: RecordType,
        id: u64,
        missing: BTreeSet<PropKeyId>,
    },
}

impl MandatoryTracker {
    fn over(record_type: RecordType, id: u64, missing: BTreeSet<PropKeyId>) -> Self {
        if missing.is_empty() {
            MandatoryTracker::Noop
        } else {
            MandatoryTracker::Active {
                record_type,
                id,
                missing,
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MandatoryTracker::Active { .. })
    }

    /// Marks `keys` as present on the record.
    pub fn receive(&mut self, keys: impl IntoIterator<Item = PropKeyId>) {
        if let MandatoryTracker::Active { missing, .. } = self {
            for key in keys {
                missing.remove(&key);
            }
        }
    }

    /// One finding per required key that was never received.
    pub fn close(self) -> Vec<Finding> {
        match self {
            MandatoryTracker::Noop => Vec::new(),
            MandatoryTracker::Active {
                record_type,
                id,
                missing,
            } => missing
                .into_iter()
                .map(|key| {
                    Finding::error(
                        record_type,
                        id,
                        format!("mandatory property {key} is missing"),
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROP_A: PropKeyId = PropKeyId(1);
    const PROP_B: PropKeyId = PropKeyId(2);

    fn rules() -> Vec<SchemaRule> {
        vec![
            SchemaRule::NodePropertyExistence {
                label: LabelId(5),
                key: PROP_A,
            },
            SchemaRule::NodePropertyExistence {
                label: LabelId(5),
                key: PROP_B,
            },
            SchemaRule::RelationshipPropertyExistence {
                rel_type: RelTypeId(0),
                key: PROP_A,
            },
        ]
    }

    #[test]
    fn reports_only_the_unobserved_key() {
        let mandatory = MandatoryProperties::from_rules(&rules());
        let mut tracker = mandatory.for_node(11, &[LabelId(5)]);
        tracker.receive([PROP_A]);
        let findings = tracker.close();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, 11);
        assert!(findings[0].message.contains(&PROP_B.to_string()));
    }

    #[test]
    fn unconstrained_records_get_a_noop_tracker() {
        let mandatory = MandatoryProperties::from_rules(&rules());
        let mut tracker = mandatory.for_node(1, &[LabelId(6)]);
        assert!(matches!(tracker, MandatoryTracker::Noop));
        tracker.receive([PROP_A]);
        assert!(tracker.close().is_empty());
        assert!(matches!(
            mandatory.for_relationship(3, RelTypeId(9)),
            MandatoryTracker::Noop
        ));
    }

    #[test]
    fn relationship_requirements_follow_type() {
        let mandatory = MandatoryProperties::from_rules(&rules());
        let findings = mandatory.for_relationship(4, RelTypeId(0)).close();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].record_type, RecordType::Relationship);
    }
}
