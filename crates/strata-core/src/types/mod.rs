//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Strata hierarchy engine:
//! - Node identifiers (`NodeId`)
//! - Typed node attributes (`AttributeValue`)
//! - The closed set of composite kinds recorded in `vtk_type` (`CompositeKind`)
//! - Error types (`StrataError`)
//!
//! ## Determinism Guarantees
//!
//! All identifier types implement `Ord` so they can key `BTreeMap`/`BTreeSet`
//! and every iteration over graph state has a stable order.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// NODE IDENTIFIER
// =============================================================================

/// Identifier of a node inside one `AssemblyGraph`.
///
/// Ids come from a per-graph monotonic counter and are never reused, even after
/// the node is removed. Ids are not comparable across different graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The root node of every graph.
    pub const ROOT: NodeId = NodeId(crate::primitives::ROOT_NODE_ID);

    /// Get the raw id value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// True for the root sentinel.
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == crate::primitives::ROOT_NODE_ID
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ATTRIBUTE VALUES
// =============================================================================

/// Value stored under a string key on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    /// Borrow the string payload, if this is a string attribute.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload. Booleans widen to 0/1; floats do not convert.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::String(s) => s.parse().ok(),
            Self::Float(_) => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::String(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(v) => Some(*v != 0),
            Self::String(s) => s.parse().ok(),
            Self::Float(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    /// Textual form used by `[@key='value']` selector predicates.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl TryFrom<u64> for AttributeValue {
    type Error = StrataError;

    fn try_from(value: u64) -> Result<Self, StrataError> {
        i64::try_from(value)
            .map(Self::Int)
            .map_err(|_| StrataError::InvalidUsage(format!("attribute value {value} exceeds i64::MAX")))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// =============================================================================
// COMPOSITE KIND
// =============================================================================

/// Composite kinds recorded in the reserved `vtk_type` attribute.
///
/// The discriminants are the VTK data-object type tags so hierarchies stay
/// interchangeable with files written by VTK-based tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompositeKind {
    MultiBlock = 13,
    MultiPiece = 29,
    OverlappingAmr = 30,
    PartitionedDataSet = 37,
    PartitionedCollection = 38,
}

impl CompositeKind {
    /// Integer tag stored under `vtk_type`.
    #[must_use]
    pub const fn tag(self) -> i64 {
        self as i64
    }

    /// Inverse of [`CompositeKind::tag`].
    #[must_use]
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            13 => Some(Self::MultiBlock),
            29 => Some(Self::MultiPiece),
            30 => Some(Self::OverlappingAmr),
            37 => Some(Self::PartitionedDataSet),
            38 => Some(Self::PartitionedCollection),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MultiBlock => "multi-block",
            Self::MultiPiece => "multi-piece",
            Self::OverlappingAmr => "amr",
            Self::PartitionedDataSet => "partitioned",
            Self::PartitionedCollection => "partitioned-collection",
        }
    }
}

impl fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Strata engine.
///
/// - Structural misuse (`InvalidNodeReference`, `InvalidParent`, `CycleDetected`)
///   is a caller bug; the graph is left unchanged.
/// - `UnsupportedSourceType` and `MalformedSelector` are expected conditions
///   that callers handle with a fallback.
#[derive(Debug, Error)]
pub enum StrataError {
    /// A builder adapter was handed a composite type it does not recognize.
    #[error("Unsupported source type: {0}")]
    UnsupportedSourceType(String),

    /// The addressed node is not live in the graph.
    #[error("Invalid node reference: {0}")]
    InvalidNodeReference(NodeId),

    /// The parent passed to an insertion is not live in the graph.
    #[error("Invalid parent node: {0}")]
    InvalidParent(NodeId),

    /// Adding the edge would make a node its own ancestor.
    #[error("Edge {parent} -> {child} would introduce a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },

    /// Inconsistent combination of arguments.
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A selector string violates the selector grammar.
    #[error("Malformed selector '{selector}': {reason}")]
    MalformedSelector { selector: String, reason: String },

    /// The caller's abort check fired during a build.
    #[error("Operation aborted")]
    Aborted,

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_attribute_values_reject_overflow() {
        assert_eq!(AttributeValue::try_from(7u64).ok(), Some(AttributeValue::Int(7)));
        assert!(matches!(
            AttributeValue::try_from(u64::MAX),
            Err(StrataError::InvalidUsage(_))
        ));
    }

    #[test]
    fn composite_kind_tags_roundtrip() {
        for kind in [
            CompositeKind::MultiBlock,
            CompositeKind::MultiPiece,
            CompositeKind::OverlappingAmr,
            CompositeKind::PartitionedDataSet,
            CompositeKind::PartitionedCollection,
        ] {
            assert_eq!(CompositeKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(CompositeKind::from_tag(4), None);
    }

    #[test]
    fn attribute_display_matches_predicate_text() {
        assert_eq!(AttributeValue::from("Side Sets").to_string(), "Side Sets");
        assert_eq!(AttributeValue::Int(13).to_string(), "13");
        assert_eq!(AttributeValue::Bool(true).to_string(), "1");
    }

    #[test]
    fn attribute_numeric_coercions() {
        assert_eq!(AttributeValue::from("42").as_int(), Some(42));
        assert_eq!(AttributeValue::Bool(false).as_int(), Some(0));
        assert_eq!(AttributeValue::Float(1.5).as_int(), None);
        assert_eq!(AttributeValue::Int(0).as_bool(), Some(false));
    }

    #[test]
    fn root_sentinel() {
        assert!(NodeId::ROOT.is_root());
        assert!(!NodeId(3).is_root());
        assert_eq!(NodeId(7).to_string(), "7");
    }
}
