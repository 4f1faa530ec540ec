//! # Persistence Format
//!
//! Binary serialization for assembly graphs.
//!
//! Format: Header (5 bytes) + postcard-serialized graph data.
//! - 4 bytes: Magic ("STRA")
//! - 1 byte: Version
//!
//! The payload size is checked against `MAX_PERSISTENCE_PAYLOAD_SIZE` and the
//! header is validated before any payload byte is decoded. Decoded graphs go
//! through `AssemblyGraph::from_parts`, so dangling references and cycles are
//! rejected.

use crate::primitives::{self, MAX_IMPORT_NODE_COUNT};
use crate::{AssemblyGraph, SerializableGraph, StrataError};

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted size of persisted graph data.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024; // 256 MB

/// Header only.
const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The persistence header precedes all graph data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), StrataError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(StrataError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(StrataError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [m0, m1, m2, m3] = self.magic;
        [m0, m1, m2, m3, self.version]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StrataError> {
        match bytes {
            [m0, m1, m2, m3, version, ..] => Ok(Self {
                magic: [*m0, *m1, *m2, *m3],
                version: *version,
            }),
            _ => Err(StrataError::DeserializationError(
                "Header too short".to_string(),
            )),
        }
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a graph to bytes (header + payload).
pub fn graph_to_bytes(graph: &AssemblyGraph) -> Result<Vec<u8>, StrataError> {
    let header = PersistenceHeader::new();
    let serializable = SerializableGraph::from(graph);

    let payload = postcard::to_stdvec(&serializable)
        .map_err(|e| StrataError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&header.to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a graph from bytes produced by [`graph_to_bytes`].
pub fn graph_from_bytes(bytes: &[u8]) -> Result<AssemblyGraph, StrataError> {
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(StrataError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    let header = PersistenceHeader::from_bytes(bytes)?;
    header.validate()?;

    let payload = bytes.get(HEADER_SIZE..).unwrap_or_default();
    let serializable: SerializableGraph = postcard::from_bytes(payload).map_err(|e| {
        StrataError::DeserializationError(format!("Failed to deserialize graph data: {e}"))
    })?;

    if serializable.nodes.len() as u64 > MAX_IMPORT_NODE_COUNT {
        return Err(StrataError::DeserializationError(format!(
            "Node count {} exceeds maximum {}",
            serializable.nodes.len(),
            MAX_IMPORT_NODE_COUNT
        )));
    }

    AssemblyGraph::try_from(serializable)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;

    fn sample() -> AssemblyGraph {
        let mut graph = AssemblyGraph::new();
        let blocks = graph.add_node("Blocks", NodeId::ROOT).expect("add");
        let leaf = graph.add_node("Leaf", blocks).expect("add");
        graph.set_attribute(leaf, "label", "Leaf 1").expect("attr");
        graph.set_attribute(leaf, "weight", 0.5).expect("attr");
        graph.add_dataset_indices(leaf, &[3, 3, 4]).expect("idx");
        graph
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let restored = PersistenceHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
        assert_eq!(&restored.magic, primitives::MAGIC_BYTES);
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let graph = sample();
        let bytes1 = graph_to_bytes(&graph).expect("first serialize");
        let restored = graph_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = graph_to_bytes(&restored).expect("second serialize");

        assert_eq!(restored, graph);
        assert_eq!(
            bytes1, bytes2,
            "save -> load -> save must produce identical bytes"
        );
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = graph_to_bytes(&sample()).expect("serialize");
        bytes[0] = b'X';
        assert!(graph_from_bytes(&bytes).is_err());
    }

    #[test]
    fn short_and_truncated_input_rejected() {
        assert!(graph_from_bytes(b"STR").is_err());
        let bytes = graph_to_bytes(&sample()).expect("serialize");
        assert!(graph_from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
