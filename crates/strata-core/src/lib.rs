//! # strata-core
//!
//! Block hierarchies for composite datasets.
//!
//! This crate models the nested block structure of a composite dataset (a
//! collection of partitioned sub-datasets organized into named, possibly
//! multi-parent groups) as a labeled DAG, and provides:
//! - `AssemblyGraph`: the mutable multi-parent graph with dataset indices
//! - `Selector` / `SelectorEngine`: path-like queries over a graph
//! - `HierarchyBuilder`: adapters from four composite layouts to a graph
//! - `CompositeRoundTrip`: the inverse, graph + flat collection to composite
//! - `filters`: block extraction and timestep grouping
//! - binary persistence and a canonical, bit-exact export
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network, no file I/O
//! - Deterministic: `BTreeMap`/`BTreeSet` storage, stable traversal orders
//! - Graphs are plain values with a single owner; queries only borrow

// =============================================================================
// MODULES
// =============================================================================

pub mod builder;
pub mod composite;
pub mod export;
pub mod filters;
pub mod formats;
pub mod graph;
pub mod path;
pub mod primitives;
pub mod roundtrip;
pub mod selector;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{AttributeValue, CompositeKind, NodeId, StrataError};

// =============================================================================
// RE-EXPORTS: Graph & Queries
// =============================================================================

pub use graph::{
    AssemblyGraph, AssemblyVisitor, FromAttribute, Node, SerializableGraph, TraversalOrder,
    is_node_name_valid, make_valid_node_name,
};
pub use path::{Anchor, Predicate, Selector, Step, StepName};
pub use selector::{Selection, SelectorEngine};

// =============================================================================
// RE-EXPORTS: Builders & Composite Model
// =============================================================================

pub use builder::{BuildOptions, BuiltHierarchy, HierarchyBuilder, NameCounter};
pub use composite::{
    AmrGrid, AmrLevel, Block, BlockEntry, CompositeDataset, CompositeSummary, DataSet,
    DataSetKind, FlatPartitionCollection, MetaData, MultiBlock, MultiPiece, PartitionedDataSet,
};
pub use filters::{extract_blocks, group_timesteps};
pub use roundtrip::CompositeRoundTrip;

// =============================================================================
// RE-EXPORTS: Formats & Export
// =============================================================================

pub use export::{
    CanonicalGraph, CanonicalHeader, canonical_checksum, export_canonical, import_canonical,
    verify_canonical,
};
#[cfg(feature = "crypto-hash")]
pub use export::{canonical_crypto_hash, compute_blake3_hash};
pub use formats::{PersistenceHeader, graph_from_bytes, graph_to_bytes};
