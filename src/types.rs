#![forbid(unsafe_code)]

//! Identifier newtypes and record-type tags shared by every checker component.

use std::fmt;

use serde::Serialize;

/// Sentinel used by records for "no reference".
pub const NONE: u64 = u64::MAX;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct LabelId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct RelTypeId(pub u32);
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct PropKeyId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PropKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<u32> for RelTypeId {
    fn from(value: u32) -> Self {
        RelTypeId(value)
    }
}

impl From<u32> for PropKeyId {
    fn from(value: u32) -> Self {
        PropKeyId(value)
    }
}

/// Kind of physical record a finding or a pass refers to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Node,
    Relationship,
    RelationshipGroup,
    Property,
    StringProperty,
    ArrayProperty,
    Schema,
    RelationshipTypeToken,
    PropertyKeyToken,
    LabelToken,
    RelationshipTypeName,
    PropertyKeyName,
    LabelName,
    LabelScanDocument,
    RelationshipTypeScanDocument,
    IndexEntry,
    Counts,
    Structure,
}

impl RecordType {
    /// Stable lowercase name used in log fields and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Node => "node",
            RecordType::Relationship => "relationship",
            RecordType::RelationshipGroup => "relationship_group",
            RecordType::Property => "property",
            RecordType::StringProperty => "string_property",
            RecordType::ArrayProperty => "array_property",
            RecordType::Schema => "schema",
            RecordType::RelationshipTypeToken => "relationship_type_token",
            RecordType::PropertyKeyToken => "property_key_token",
            RecordType::LabelToken => "label_token",
            RecordType::RelationshipTypeName => "relationship_type_name",
            RecordType::PropertyKeyName => "property_key_name",
            RecordType::LabelName => "label_name",
            RecordType::LabelScanDocument => "label_scan_document",
            RecordType::RelationshipTypeScanDocument => "relationship_type_scan_document",
            RecordType::IndexEntry => "index_entry",
            RecordType::Counts => "counts",
            RecordType::Structure => "structure",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
