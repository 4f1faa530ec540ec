//! # Composite Data Model
//!
//! The in-process shapes handed to the hierarchy builders and produced by the
//! round trip:
//! - `FlatPartitionCollection`: a dense list of partitioned slots
//! - `MultiBlock`: a nested tree of named blocks
//! - `MultiPiece`: a flat list of pieces
//! - `AmrGrid`: levels of blocks
//!
//! `CompositeDataset` is the closed set of source shapes. Anything else is
//! `Unsupported` and rejected by the builder.
//!
//! ## Composite ids
//!
//! Objects are numbered in pre-order over the composite tree, root = 0. Every
//! visited object (containers included) consumes one id. Partitions inside a
//! partitioned slot consume ids but never get a hierarchy node. AMR level
//! containers consume none; AMR blocks are numbered `1 + global block index`.

use crate::{AssemblyGraph, CompositeKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// LEAF DATASETS
// =============================================================================

/// Concrete leaf dataset kinds. Only the tag matters to the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSetKind {
    #[default]
    PolyData,
    StructuredGrid,
    RectilinearGrid,
    UnstructuredGrid,
    ImageData,
    Table,
}

impl DataSetKind {
    /// Integer tag recorded under `vtk_type` on leaf nodes.
    #[must_use]
    pub const fn tag(self) -> i64 {
        match self {
            Self::PolyData => 0,
            Self::StructuredGrid => 2,
            Self::RectilinearGrid => 3,
            Self::UnstructuredGrid => 4,
            Self::ImageData => 6,
            Self::Table => 19,
        }
    }

    #[must_use]
    pub const fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(Self::PolyData),
            2 => Some(Self::StructuredGrid),
            3 => Some(Self::RectilinearGrid),
            4 => Some(Self::UnstructuredGrid),
            6 => Some(Self::ImageData),
            19 => Some(Self::Table),
            _ => None,
        }
    }
}

/// A single non-composite dataset, reduced to what the hierarchy needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSet {
    #[serde(default)]
    pub kind: DataSetKind,
    #[serde(default)]
    pub number_of_points: u64,
    #[serde(default)]
    pub number_of_cells: u64,
}

impl DataSet {
    #[must_use]
    pub fn new(kind: DataSetKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_counts(kind: DataSetKind, number_of_points: u64, number_of_cells: u64) -> Self {
        Self {
            kind,
            number_of_points,
            number_of_cells,
        }
    }
}

/// Per-block / per-slot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaData {
    /// Display name (the `NAME` key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Composite id of the source object this slot was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_index: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl MetaData {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

// =============================================================================
// FLAT PARTITION COLLECTION
// =============================================================================

/// One outer slot: a group of partitions plus its metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartitionedDataSet {
    #[serde(default)]
    pub meta: MetaData,
    /// `None` entries are empty partitions; they still count.
    #[serde(default)]
    pub partitions: Vec<Option<DataSet>>,
}

impl PartitionedDataSet {
    /// A slot holding `count` empty partitions.
    #[must_use]
    pub fn with_empty_partitions(count: usize) -> Self {
        Self {
            meta: MetaData::default(),
            partitions: vec![None; count],
        }
    }

    #[must_use]
    pub fn number_of_partitions(&self) -> usize {
        self.partitions.len()
    }
}

/// Two-level flat structure: `collection.slots[i].partitions[j]`.
///
/// Hierarchies and assemblies reference the outer position `i` (or, for
/// hierarchies, the slot's recorded composite id), never individual partitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlatPartitionCollection {
    #[serde(default)]
    pub slots: Vec<PartitionedDataSet>,
    /// Optional user-defined grouping over the slots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly: Option<AssemblyGraph>,
}

impl FlatPartitionCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn number_of_partitioned_datasets(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn partitioned_dataset(&self, index: usize) -> Option<&PartitionedDataSet> {
        self.slots.get(index)
    }

    #[must_use]
    pub fn metadata(&self, index: usize) -> Option<&MetaData> {
        self.slots.get(index).map(|s| &s.meta)
    }

    /// Append a slot, returning its outer index.
    pub fn push(&mut self, slot: PartitionedDataSet) -> usize {
        self.slots.push(slot);
        self.slots.len().saturating_sub(1)
    }

    /// Composite id of slot `index` when this collection is itself the source:
    /// the root takes 0, each slot one id, each of its partitions one more.
    #[must_use]
    pub fn composite_id_of_slot(&self, index: usize) -> u64 {
        self.slots
            .iter()
            .take(index)
            .fold(1u64, |cid, slot| {
                cid.saturating_add(1)
                    .saturating_add(slot.partitions.len() as u64)
            })
    }

    /// Outer index whose metadata records `composite_index == cid`.
    #[must_use]
    pub fn slot_with_composite_index(&self, cid: u64) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.meta.composite_index == Some(cid))
    }

    /// Total number of partitions over all slots, empty ones included.
    #[must_use]
    pub fn number_of_partitions(&self) -> usize {
        self.slots.iter().map(|s| s.partitions.len()).sum()
    }
}

// =============================================================================
// MULTI-BLOCK / MULTI-PIECE
// =============================================================================

/// A flat list of pieces of one logical dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiPiece {
    #[serde(default)]
    pub pieces: Vec<Option<DataSet>>,
}

impl MultiPiece {
    #[must_use]
    pub fn with_empty_pieces(count: usize) -> Self {
        Self {
            pieces: vec![None; count],
        }
    }
}

/// Content of one multi-block child.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// A null block.
    #[default]
    Empty,
    DataSet(DataSet),
    MultiBlock(MultiBlock),
    MultiPiece(MultiPiece),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockEntry {
    #[serde(default)]
    pub meta: MetaData,
    #[serde(default)]
    pub block: Block,
}

/// A nested tree of blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultiBlock {
    #[serde(default)]
    pub blocks: Vec<BlockEntry>,
}

impl MultiBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append of a named child.
    #[must_use]
    pub fn with_block(mut self, name: &str, block: Block) -> Self {
        self.push(Some(name), block);
        self
    }

    /// Append a child; `None` leaves the name metadata unset.
    pub fn push(&mut self, name: Option<&str>, block: Block) {
        let meta = name.map(MetaData::named).unwrap_or_default();
        self.blocks.push(BlockEntry { meta, block });
    }

    #[must_use]
    pub fn number_of_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index).map(|e| &e.block)
    }
}

// =============================================================================
// AMR
// =============================================================================

fn default_refinement_ratio() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmrLevel {
    #[serde(default = "default_refinement_ratio")]
    pub refinement_ratio: u32,
    #[serde(default)]
    pub spacing: [f64; 3],
    /// `None` marks an empty block; it still occupies its position.
    #[serde(default)]
    pub blocks: Vec<Option<DataSet>>,
}

impl Default for AmrLevel {
    fn default() -> Self {
        Self {
            refinement_ratio: default_refinement_ratio(),
            spacing: [0.0; 3],
            blocks: Vec::new(),
        }
    }
}

/// Blocked AMR grid: levels of blocks at increasing resolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AmrGrid {
    #[serde(default)]
    pub origin: [f64; 3],
    #[serde(default)]
    pub levels: Vec<AmrLevel>,
}

impl AmrGrid {
    /// Grid with the given block counts per level, all blocks empty.
    #[must_use]
    pub fn with_blocks_per_level(blocks_per_level: &[usize]) -> Self {
        Self {
            origin: [0.0; 3],
            levels: blocks_per_level
                .iter()
                .map(|count| AmrLevel {
                    blocks: vec![None; *count],
                    ..AmrLevel::default()
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn blocks_per_level(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.blocks.len()).collect()
    }

    #[must_use]
    pub fn dataset(&self, level: usize, index: usize) -> Option<&DataSet> {
        self.levels.get(level)?.blocks.get(index)?.as_ref()
    }

    /// Store `dataset` at (level, index), growing the grid as needed.
    pub fn set_dataset(&mut self, level: usize, index: usize, dataset: Option<DataSet>) {
        if self.levels.len() <= level {
            self.levels.resize_with(level.saturating_add(1), AmrLevel::default);
        }
        if let Some(l) = self.levels.get_mut(level) {
            if l.blocks.len() <= index {
                l.blocks.resize(index.saturating_add(1), None);
            }
            if let Some(slot) = l.blocks.get_mut(index) {
                *slot = dataset;
            }
        }
    }
}

// =============================================================================
// COMPOSITE DATASET
// =============================================================================

/// The closed set of composite source shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompositeDataset {
    PartitionedCollection(FlatPartitionCollection),
    MultiBlock(MultiBlock),
    MultiPiece(MultiPiece),
    Amr(AmrGrid),
    /// Any other runtime type; carried only to be rejected with its name.
    Unsupported { type_name: String },
}

/// Shape summary used to compare a source against its round trip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CompositeSummary {
    pub kind: Option<CompositeKind>,
    pub leaf_count: usize,
    /// Edges from the root to the deepest block.
    pub depth: usize,
    pub leaf_names: BTreeSet<String>,
}

impl CompositeDataset {
    /// Composite kind tag, `None` for unsupported types.
    #[must_use]
    pub fn kind(&self) -> Option<CompositeKind> {
        match self {
            Self::PartitionedCollection(_) => Some(CompositeKind::PartitionedCollection),
            Self::MultiBlock(_) => Some(CompositeKind::MultiBlock),
            Self::MultiPiece(_) => Some(CompositeKind::MultiPiece),
            Self::Amr(_) => Some(CompositeKind::OverlappingAmr),
            Self::Unsupported { .. } => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Unsupported { type_name } => type_name,
            other => other.kind().map(CompositeKind::name).unwrap_or("unknown"),
        }
    }

    /// Leaf count, nesting depth and leaf names.
    #[must_use]
    pub fn summary(&self) -> CompositeSummary {
        let mut summary = CompositeSummary {
            kind: self.kind(),
            ..CompositeSummary::default()
        };
        match self {
            Self::PartitionedCollection(collection) => {
                summary.leaf_count = collection.slots.len();
                summary.depth = usize::from(!collection.slots.is_empty());
                summary.leaf_names = collection
                    .slots
                    .iter()
                    .filter_map(|s| s.meta.name.clone())
                    .collect();
            }
            Self::MultiBlock(mb) => summarize_multiblock(mb, 0, &mut summary),
            Self::MultiPiece(mp) => {
                summary.leaf_count = mp.pieces.len();
                summary.depth = usize::from(!mp.pieces.is_empty());
            }
            Self::Amr(amr) => {
                summary.leaf_count = amr.levels.iter().map(|l| l.blocks.len()).sum();
                summary.depth = if summary.leaf_count > 0 {
                    2
                } else {
                    usize::from(!amr.levels.is_empty())
                };
            }
            Self::Unsupported { .. } => {}
        }
        summary
    }
}

fn summarize_multiblock(mb: &MultiBlock, depth: usize, summary: &mut CompositeSummary) {
    for entry in &mb.blocks {
        let child_depth = depth.saturating_add(1);
        summary.depth = summary.depth.max(child_depth);
        match &entry.block {
            Block::MultiBlock(nested) => summarize_multiblock(nested, child_depth, summary),
            _ => {
                summary.leaf_count = summary.leaf_count.saturating_add(1);
                if let Some(name) = &entry.meta.name {
                    summary.leaf_names.insert(name.clone());
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
