//! # Primitives
//!
//! Fixed constants shared by the graph, the selector engine, the builders and
//! the persistence formats.

/// Id of the root node in every graph.
pub const ROOT_NODE_ID: u64 = 0;

/// Name given to the root node of a freshly created graph.
pub const DEFAULT_ROOT_NAME: &str = "Root";

// =============================================================================
// RESERVED ATTRIBUTE KEYS
// =============================================================================

/// Human readable display name of a node.
pub const LABEL_KEY: &str = "label";

/// Integer tag of the composite kind (see `CompositeKind`) or leaf dataset kind.
pub const TYPE_KEY: &str = "vtk_type";

/// Composite id of the object a hierarchy node was built from.
pub const CID_KEY: &str = "cid";

/// AMR level number on level nodes.
pub const LEVEL_KEY: &str = "level";

/// Selector predicate key matching on dataset-index ownership.
pub const CID_PREDICATE: &str = "cid";

// =============================================================================
// PERSISTENCE FORMAT
// =============================================================================

/// Magic bytes for the Strata binary graph format header.
///
/// File Header = Magic Bytes ("STRA") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"STRA";

/// Current serialization format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a selector string accepted by the parser.
pub const MAX_SELECTOR_LENGTH: usize = 4096;

/// Maximum number of nodes accepted when importing a graph.
pub const MAX_IMPORT_NODE_COUNT: u64 = 1_000_000;

/// Maximum nesting depth the multi-block adapter descends into.
///
/// Deeper trees are rejected instead of risking stack exhaustion.
pub const MAX_BLOCK_DEPTH: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_zero() {
        assert_eq!(ROOT_NODE_ID, 0);
    }

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"STRA");
    }
}
