//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of an `AssemblyGraph`.
//!
//! Two graphs with the same nodes, edges (including child and parent order),
//! attributes, dataset indices and id counter export to identical bytes. The
//! export is what `hash` commands and cross-run comparisons operate on.

use crate::graph::Node;
use crate::primitives::MAX_IMPORT_NODE_COUNT;
use crate::{AssemblyGraph, AttributeValue, NodeId, StrataError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Magic bytes for canonical export format.
pub const CANONICAL_MAGIC: [u8; 4] = *b"STRX"; // Strata Export

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Maximum allowed edge count in canonical imports.
pub const MAX_IMPORT_EDGE_COUNT: u64 = 10_000_000;

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub node_count: u64,
    pub edge_count: u64,
    /// XOR checksum of the data section.
    pub checksum: u64,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(node_count: u64, edge_count: u64, checksum: u64) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            node_count,
            edge_count,
            checksum,
        }
    }

    pub fn validate(&self) -> Result<(), StrataError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(StrataError::DeserializationError(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(StrataError::DeserializationError(
                "Unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL RECORDS (Sorted, Deterministic)
// =============================================================================

/// A node in canonical format, sorted by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalNode {
    pub id: u64,
    pub name: String,
    pub dataset_indices: Vec<u64>,
}

/// A parent-child edge.
///
/// `position` is the child's rank among the parent's children, `parent_rank`
/// the parent's rank among the child's parents. Sorted by (parent, position).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalEdge {
    pub parent: u64,
    pub position: u32,
    pub child: u64,
    pub parent_rank: u32,
}

/// An attribute as (kind, text), sorted by (node_id, key).
///
/// Kinds: 0 string, 1 integer, 2 float, 3 boolean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalAttribute {
    pub node_id: u64,
    pub key: String,
    pub kind: u8,
    pub text: String,
}

impl CanonicalAttribute {
    fn new(node_id: NodeId, key: &str, value: &AttributeValue) -> Self {
        let kind = match value {
            AttributeValue::String(_) => 0,
            AttributeValue::Int(_) => 1,
            AttributeValue::Float(_) => 2,
            AttributeValue::Bool(_) => 3,
        };
        Self {
            node_id: node_id.0,
            key: key.to_string(),
            kind,
            text: value.to_string(),
        }
    }

    fn value(&self) -> Result<AttributeValue, StrataError> {
        let bad = || {
            StrataError::DeserializationError(format!(
                "Attribute '{}' of node {} has invalid value",
                self.key, self.node_id
            ))
        };
        Ok(match self.kind {
            0 => AttributeValue::String(self.text.clone()),
            1 => AttributeValue::Int(self.text.parse().map_err(|_| bad())?),
            2 => AttributeValue::Float(self.text.parse().map_err(|_| bad())?),
            3 => AttributeValue::Bool(self.text.parse::<u8>().map_err(|_| bad())? != 0),
            _ => return Err(bad()),
        })
    }
}

/// A graph in canonical format for bit-exact serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalGraph {
    pub nodes: Vec<CanonicalNode>,
    pub edges: Vec<CanonicalEdge>,
    pub attributes: Vec<CanonicalAttribute>,
    pub next_node_id: u64,
}

impl CanonicalGraph {
    #[must_use]
    pub fn from_graph(graph: &AssemblyGraph) -> Self {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut attributes = Vec::new();

        for node in graph.nodes() {
            nodes.push(CanonicalNode {
                id: node.id.0,
                name: node.name.clone(),
                dataset_indices: node.dataset_indices.clone(),
            });
            for (position, child) in node.children.iter().enumerate() {
                let parent_rank = graph
                    .parents(*child)
                    .ok()
                    .and_then(|ps| ps.iter().position(|p| *p == node.id))
                    .unwrap_or(0);
                edges.push(CanonicalEdge {
                    parent: node.id.0,
                    position: position as u32,
                    child: child.0,
                    parent_rank: parent_rank as u32,
                });
            }
            for (key, value) in &node.attributes {
                attributes.push(CanonicalAttribute::new(node.id, key, value));
            }
        }
        nodes.sort();
        edges.sort();
        attributes.sort();

        Self {
            nodes,
            edges,
            attributes,
            next_node_id: graph.next_node_id(),
        }
    }

    /// Rebuild the graph, preserving ids and both edge orders.
    pub fn to_graph(&self) -> Result<AssemblyGraph, StrataError> {
        let mut nodes: BTreeMap<u64, Node> = BTreeMap::new();
        for cn in &self.nodes {
            nodes.insert(
                cn.id,
                Node {
                    id: NodeId(cn.id),
                    name: cn.name.clone(),
                    attributes: BTreeMap::new(),
                    dataset_indices: cn.dataset_indices.clone(),
                    children: Vec::new(),
                    parents: Vec::new(),
                },
            );
        }

        let missing = |id: u64| StrataError::DeserializationError(format!("Unknown node {id}"));

        // Edges are sorted by (parent, position): children come out in order.
        let mut parent_slots: BTreeMap<u64, Vec<(u32, NodeId)>> = BTreeMap::new();
        for edge in &self.edges {
            nodes
                .get_mut(&edge.parent)
                .ok_or_else(|| missing(edge.parent))?
                .children
                .push(NodeId(edge.child));
            parent_slots
                .entry(edge.child)
                .or_default()
                .push((edge.parent_rank, NodeId(edge.parent)));
        }
        for (child, mut ranked) in parent_slots {
            ranked.sort();
            nodes.get_mut(&child).ok_or_else(|| missing(child))?.parents =
                ranked.into_iter().map(|(_, p)| p).collect();
        }

        for attr in &self.attributes {
            let value = attr.value()?;
            nodes
                .get_mut(&attr.node_id)
                .ok_or_else(|| missing(attr.node_id))?
                .attributes
                .insert(attr.key.clone(), value);
        }

        AssemblyGraph::from_parts(nodes.into_values().collect(), self.next_node_id)
            .map_err(|e| StrataError::DeserializationError(e.to_string()))
    }

    /// Deterministic XOR checksum of the data.
    ///
    /// Detects accidental corruption only; it is not collision resistant. Use
    /// `canonical_crypto_hash` (feature `crypto-hash`) where that matters.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0;

        for node in &self.nodes {
            hash ^= node.id.rotate_left(13);
            hash ^= hash_bytes(node.name.as_bytes(), 7);
            for (i, index) in node.dataset_indices.iter().enumerate() {
                hash ^= index.rotate_left(((i % 61) as u32).wrapping_add(3));
            }
        }

        for edge in &self.edges {
            hash ^= edge.parent.rotate_left(17);
            hash ^= edge.child.rotate_left(11);
            hash ^= u64::from(edge.position).rotate_left(5);
            hash ^= u64::from(edge.parent_rank).rotate_left(37);
        }

        for attr in &self.attributes {
            hash ^= attr.node_id.rotate_left(19);
            hash ^= hash_bytes(attr.key.as_bytes(), 23);
            hash ^= u64::from(attr.kind).rotate_left(41);
            hash ^= hash_bytes(attr.text.as_bytes(), 29);
        }

        hash ^= self.next_node_id.rotate_left(3);
        hash
    }
}

/// Position-sensitive byte folding.
fn hash_bytes(bytes: &[u8], rotation: u32) -> u64 {
    bytes.iter().enumerate().fold(0u64, |acc, (i, byte)| {
        acc ^ u64::from(*byte).rotate_left(rotation.wrapping_add((i % 53) as u32))
    })
}

// =============================================================================
// EXPORT FUNCTIONS
// =============================================================================

/// Export a graph to canonical postcard format.
///
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalGraph (postcard)]
/// ```
pub fn export_canonical(graph: &AssemblyGraph) -> Result<Vec<u8>, StrataError> {
    let canonical = CanonicalGraph::from_graph(graph);
    let header = CanonicalHeader::new(
        canonical.nodes.len() as u64,
        canonical.edges.len() as u64,
        canonical.checksum(),
    );

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| StrataError::SerializationError(format!("Header: {e}")))?;
    let data_bytes = postcard::to_allocvec(&canonical)
        .map_err(|e| StrataError::SerializationError(format!("Data: {e}")))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Import a graph from canonical postcard format.
///
/// Checks header, size limits, checksum and counts before rebuilding.
pub fn import_canonical(data: &[u8]) -> Result<AssemblyGraph, StrataError> {
    let too_short = || StrataError::DeserializationError("Data too short".to_string());

    let len_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(too_short)?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_end = header_len.checked_add(4).ok_or_else(too_short)?;
    let header_bytes = data.get(4..header_end).ok_or_else(too_short)?;

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| StrataError::DeserializationError(format!("Header: {e}")))?;
    header.validate()?;

    if header.node_count > MAX_IMPORT_NODE_COUNT {
        return Err(StrataError::DeserializationError(format!(
            "Node count {} exceeds maximum allowed {}",
            header.node_count, MAX_IMPORT_NODE_COUNT
        )));
    }
    if header.edge_count > MAX_IMPORT_EDGE_COUNT {
        return Err(StrataError::DeserializationError(format!(
            "Edge count {} exceeds maximum allowed {}",
            header.edge_count, MAX_IMPORT_EDGE_COUNT
        )));
    }

    let payload = data.get(header_end..).ok_or_else(too_short)?;
    let canonical: CanonicalGraph = postcard::from_bytes(payload)
        .map_err(|e| StrataError::DeserializationError(format!("Data: {e}")))?;

    let computed = canonical.checksum();
    if computed != header.checksum {
        return Err(StrataError::DeserializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }
    if canonical.nodes.len() as u64 != header.node_count {
        return Err(StrataError::DeserializationError(
            "Node count mismatch".to_string(),
        ));
    }
    if canonical.edges.len() as u64 != header.edge_count {
        return Err(StrataError::DeserializationError(
            "Edge count mismatch".to_string(),
        ));
    }

    canonical.to_graph()
}

/// True if `canonical_data` imports to a graph equal to `graph`.
pub fn verify_canonical(graph: &AssemblyGraph, canonical_data: &[u8]) -> Result<bool, StrataError> {
    let imported = import_canonical(canonical_data)?;
    Ok(CanonicalGraph::from_graph(graph) == CanonicalGraph::from_graph(&imported))
}

/// Quick equality fingerprint of a graph.
#[must_use]
pub fn canonical_checksum(graph: &AssemblyGraph) -> u64 {
    CanonicalGraph::from_graph(graph).checksum()
}

// =============================================================================
// CRYPTOGRAPHIC HASH SUPPORT
// =============================================================================

/// BLAKE3 hash (hex, 64 characters) of the canonical export.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash(graph: &AssemblyGraph) -> Result<String, StrataError> {
    let data = export_canonical(graph)?;
    Ok(compute_blake3_hash(&data))
}

/// BLAKE3 hash (hex) of raw bytes.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn compute_blake3_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_graph() -> AssemblyGraph {
        let mut graph = AssemblyGraph::new();
        let a = graph.add_node("A", NodeId::ROOT).expect("add");
        let b = graph.add_node("B", NodeId::ROOT).expect("add");
        let shared = graph.add_node("Shared", b).expect("add");
        graph.add_edge(a, shared).expect("edge");
        graph.set_attribute(a, "label", "Group A").expect("attr");
        graph.set_attribute(a, "vtk_type", 13i64).expect("attr");
        graph.set_attribute(shared, "ratio", 0.25).expect("attr");
        graph.set_attribute(shared, "visible", true).expect("attr");
        graph.add_dataset_indices(shared, &[4, 2, 4]).expect("idx");
        graph
    }

    #[test]
    fn canonical_roundtrip_is_exact() {
        let graph = create_test_graph();
        let exported = export_canonical(&graph).expect("export");
        let imported = import_canonical(&exported).expect("import");

        assert_eq!(imported, graph);
        // Parent order survives: B was the first parent of Shared.
        assert_eq!(
            imported.parents(NodeId(3)).expect("parents"),
            &[NodeId(2), NodeId(1)]
        );
    }

    #[test]
    fn canonical_export_deterministic() {
        let graph = create_test_graph();
        let export1 = export_canonical(&graph).expect("export 1");
        let export2 = export_canonical(&graph.deep_copy()).expect("export 2");
        assert_eq!(export1, export2, "Exports must be bit-identical");
        assert_eq!(canonical_checksum(&graph), canonical_checksum(&graph));
    }

    #[test]
    fn checksum_sees_child_order() {
        let mut graph = AssemblyGraph::new();
        graph.add_nodes(&["x", "y"], NodeId::ROOT).expect("add");
        let mut swapped = AssemblyGraph::new();
        swapped.add_nodes(&["y", "x"], NodeId::ROOT).expect("add");
        assert_ne!(canonical_checksum(&graph), canonical_checksum(&swapped));
    }

    #[test]
    fn verify_canonical_detects_corruption() {
        let graph = create_test_graph();
        let mut exported = export_canonical(&graph).expect("export");
        assert!(verify_canonical(&graph, &exported).expect("verify"));

        if let Some(last) = exported.last_mut() {
            *last ^= 0xFF;
        }
        let result = verify_canonical(&graph, &exported);
        assert!(result.is_err() || !result.unwrap_or(true));
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(import_canonical(&[1, 0]).is_err());
        assert!(import_canonical(&[200, 0, 0, 0, 1]).is_err());
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn blake3_hash_is_stable() {
        let graph = create_test_graph();
        let h1 = canonical_crypto_hash(&graph).expect("hash");
        let h2 = canonical_crypto_hash(&graph).expect("hash");
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
    }
}
