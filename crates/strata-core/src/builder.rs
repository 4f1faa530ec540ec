//! # Hierarchy Builder
//!
//! One adapter per supported composite shape, each producing an
//! `AssemblyGraph` that mirrors the source nesting plus a flat partition
//! collection holding one slot per leaf dataset.
//!
//! ## Indexing
//!
//! Hierarchy dataset indices are composite ids (see `composite`). Every output
//! slot records the composite id it was built from in
//! `MetaData::composite_index`, which is how `CompositeRoundTrip` finds the data
//! of a leaf again.
//!
//! ## Node attributes
//!
//! | key        | set on                                     |
//! |------------|--------------------------------------------|
//! | `label`    | nodes whose source carried a name          |
//! | `cid`      | every node built from a composite object   |
//! | `vtk_type` | containers and leaves carrying a dataset   |
//! | `level`    | AMR level nodes                            |
//!
//! A failed build returns an error and no graph at all.

use crate::composite::{
    AmrGrid, Block, CompositeDataset, FlatPartitionCollection, MetaData, MultiBlock, MultiPiece,
    PartitionedDataSet,
};
use crate::graph::make_valid_node_name;
use crate::primitives::{CID_KEY, LABEL_KEY, LEVEL_KEY, MAX_BLOCK_DEPTH, TYPE_KEY};
use crate::{AssemblyGraph, AttributeValue, CompositeKind, NodeId, StrataError};
use tracing::debug;

// =============================================================================
// OPTIONS & OUTPUT
// =============================================================================

/// Knobs for a single build call.
#[derive(Default)]
pub struct BuildOptions<'a> {
    /// Polled between blocks; returning true aborts the build.
    pub abort: Option<&'a dyn Fn() -> bool>,
}

impl std::fmt::Debug for BuildOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOptions")
            .field("abort", &self.abort.is_some())
            .finish()
    }
}

/// A hierarchy and the flat collection its indices describe.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltHierarchy {
    pub hierarchy: AssemblyGraph,
    pub collection: FlatPartitionCollection,
}

/// Generated names for unnamed blocks, scoped to one build.
#[derive(Debug, Clone, Default)]
pub struct NameCounter {
    next: u64,
}

impl NameCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `{prefix}{n}` with a fresh `n`.
    pub fn generate(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}{}", self.next);
        self.next = self.next.saturating_add(1);
        name
    }

    /// Path-safe form of `display`, or a generated name when nothing survives.
    pub fn node_name(&mut self, display: Option<&str>, prefix: &str) -> String {
        let valid = display.map(make_valid_node_name).unwrap_or_default();
        if valid.is_empty() {
            self.generate(prefix)
        } else {
            valid
        }
    }
}

// =============================================================================
// BUILD STATE
// =============================================================================

struct BuildState<'o, 'a> {
    graph: AssemblyGraph,
    collection: FlatPartitionCollection,
    next_cid: u64,
    names: NameCounter,
    options: &'o BuildOptions<'a>,
}

impl<'o, 'a> BuildState<'o, 'a> {
    /// Fresh graph whose root stands for composite id 0.
    fn new(kind: CompositeKind, options: &'o BuildOptions<'a>) -> Result<Self, StrataError> {
        let mut graph = AssemblyGraph::new();
        graph.set_attribute(NodeId::ROOT, TYPE_KEY, kind.tag())?;
        graph.set_attribute(NodeId::ROOT, CID_KEY, 0i64)?;
        graph.add_dataset_index(NodeId::ROOT, 0)?;
        Ok(Self {
            graph,
            collection: FlatPartitionCollection::new(),
            next_cid: 1,
            names: NameCounter::new(),
            options,
        })
    }

    fn check_abort(&self) -> Result<(), StrataError> {
        match self.options.abort {
            Some(abort) if abort() => Err(StrataError::Aborted),
            _ => Ok(()),
        }
    }

    fn take_cid(&mut self) -> u64 {
        let cid = self.next_cid;
        self.next_cid = self.next_cid.saturating_add(1);
        cid
    }

    fn skip_cids(&mut self, count: usize) {
        self.next_cid = self.next_cid.saturating_add(count as u64);
    }

    /// Add a child carrying the `cid` attribute and, if named, a `label`.
    fn add_child(
        &mut self,
        parent: NodeId,
        name: &str,
        label: Option<&str>,
        cid: u64,
    ) -> Result<NodeId, StrataError> {
        let node = self.graph.add_node(name, parent)?;
        self.graph
            .set_attribute(node, CID_KEY, AttributeValue::try_from(cid)?)?;
        if let Some(label) = label {
            self.graph.set_attribute(node, LABEL_KEY, label)?;
        }
        Ok(node)
    }

    /// Own `cid` on `node` and append the matching output slot.
    fn emit_slot(
        &mut self,
        node: NodeId,
        cid: u64,
        name: Option<&str>,
        partitions: Vec<Option<crate::composite::DataSet>>,
    ) -> Result<(), StrataError> {
        self.graph.add_dataset_index(node, cid)?;
        self.collection.push(PartitionedDataSet {
            meta: MetaData {
                name: name.map(str::to_string),
                composite_index: Some(cid),
                ..MetaData::default()
            },
            partitions,
        });
        Ok(())
    }

    fn finish(self) -> BuiltHierarchy {
        debug!(
            nodes = self.graph.node_count(),
            slots = self.collection.number_of_partitioned_datasets(),
            "hierarchy built"
        );
        BuiltHierarchy {
            hierarchy: self.graph,
            collection: self.collection,
        }
    }
}

// =============================================================================
// ADAPTERS
// =============================================================================

/// Dispatches a composite dataset to the adapter for its shape.
pub struct HierarchyBuilder;

impl HierarchyBuilder {
    /// Build a hierarchy for any supported shape.
    ///
    /// Fails with `UnsupportedSourceType` for `CompositeDataset::Unsupported`
    /// and with `Aborted` when the abort check fires.
    pub fn build(
        source: &CompositeDataset,
        options: &BuildOptions<'_>,
    ) -> Result<BuiltHierarchy, StrataError> {
        debug!(source = source.type_name(), "building hierarchy");
        match source {
            CompositeDataset::PartitionedCollection(c) => {
                Self::from_partitioned_collection(c, options)
            }
            CompositeDataset::MultiBlock(mb) => Self::from_multiblock(mb, options),
            CompositeDataset::MultiPiece(mp) => Self::from_multipiece(mp, options),
            CompositeDataset::Amr(amr) => Self::from_amr(amr, options),
            CompositeDataset::Unsupported { type_name } => {
                Err(StrataError::UnsupportedSourceType(type_name.clone()))
            }
        }
    }

    /// One child per outer slot, each owning the slot's composite id.
    ///
    /// An assembly attached to the source is carried over to the output
    /// collection but never used to shape the hierarchy.
    pub fn from_partitioned_collection(
        source: &FlatPartitionCollection,
        options: &BuildOptions<'_>,
    ) -> Result<BuiltHierarchy, StrataError> {
        let mut state = BuildState::new(CompositeKind::PartitionedCollection, options)?;
        for slot in &source.slots {
            state.check_abort()?;
            let cid = state.take_cid();
            let label = slot.meta.name.as_deref();
            let name = state.names.node_name(label, "Block");
            let node = state.add_child(NodeId::ROOT, &name, label, cid)?;
            state
                .graph
                .set_attribute(node, TYPE_KEY, CompositeKind::PartitionedDataSet.tag())?;
            state.graph.add_dataset_index(node, cid)?;

            let mut copy = slot.clone();
            copy.meta.composite_index = Some(cid);
            state.collection.push(copy);
            state.skip_cids(slot.partitions.len());
        }
        state.collection.assembly = source.assembly.clone();
        Ok(state.finish())
    }

    /// Mirror the nested block tree; one output slot per leaf, depth first.
    pub fn from_multiblock(
        source: &MultiBlock,
        options: &BuildOptions<'_>,
    ) -> Result<BuiltHierarchy, StrataError> {
        let mut state = BuildState::new(CompositeKind::MultiBlock, options)?;
        add_blocks(&mut state, source, NodeId::ROOT, 1)?;
        Ok(state.finish())
    }

    /// One `PieceN` leaf per piece under the root.
    pub fn from_multipiece(
        source: &MultiPiece,
        options: &BuildOptions<'_>,
    ) -> Result<BuiltHierarchy, StrataError> {
        let mut state = BuildState::new(CompositeKind::MultiPiece, options)?;
        for (index, piece) in source.pieces.iter().enumerate() {
            state.check_abort()?;
            let cid = state.take_cid();
            let node = state.add_child(NodeId::ROOT, &format!("Piece{index}"), None, cid)?;
            if let Some(ds) = piece {
                state.graph.set_attribute(node, TYPE_KEY, ds.kind.tag())?;
            }
            state.emit_slot(node, cid, None, piece.iter().cloned().map(Some).collect())?;
        }
        Ok(state.finish())
    }

    /// `LevelN` nodes holding `DataSetI` block leaves.
    ///
    /// Empty blocks keep their node but own no index and emit no slot.
    pub fn from_amr(
        source: &AmrGrid,
        options: &BuildOptions<'_>,
    ) -> Result<BuiltHierarchy, StrataError> {
        let mut state = BuildState::new(CompositeKind::OverlappingAmr, options)?;
        for (level, amr_level) in source.levels.iter().enumerate() {
            let level_node = state.graph.add_node(&format!("Level{level}"), NodeId::ROOT)?;
            let level_value = AttributeValue::try_from(level as u64)?;
            state.graph.set_attribute(level_node, LEVEL_KEY, level_value)?;

            for (index, block) in amr_level.blocks.iter().enumerate() {
                state.check_abort()?;
                let cid = state.take_cid();
                let node = state.add_child(level_node, &format!("DataSet{index}"), None, cid)?;
                if let Some(ds) = block {
                    state.graph.set_attribute(node, TYPE_KEY, ds.kind.tag())?;
                    state.emit_slot(node, cid, None, vec![Some(ds.clone())])?;
                }
            }
        }
        Ok(state.finish())
    }
}

fn add_blocks(
    state: &mut BuildState<'_, '_>,
    source: &MultiBlock,
    parent: NodeId,
    depth: usize,
) -> Result<(), StrataError> {
    if depth > MAX_BLOCK_DEPTH {
        return Err(StrataError::InvalidUsage(format!(
            "multi-block nesting exceeds {MAX_BLOCK_DEPTH} levels"
        )));
    }
    for entry in &source.blocks {
        state.check_abort()?;
        let cid = state.take_cid();
        let label = entry.meta.name.as_deref();
        let name = state.names.node_name(label, "Block");
        let node = state.add_child(parent, &name, label, cid)?;

        match &entry.block {
            Block::MultiBlock(nested) => {
                state
                    .graph
                    .set_attribute(node, TYPE_KEY, CompositeKind::MultiBlock.tag())?;
                // An empty group still gets its node, just no index.
                if !nested.blocks.is_empty() {
                    state.graph.add_dataset_index(node, cid)?;
                }
                add_blocks(state, nested, node, depth.saturating_add(1))?;
            }
            Block::DataSet(ds) => {
                state.graph.set_attribute(node, TYPE_KEY, ds.kind.tag())?;
                state.emit_slot(node, cid, label, vec![Some(ds.clone())])?;
            }
            Block::Empty => state.emit_slot(node, cid, label, Vec::new())?,
            Block::MultiPiece(mp) => {
                state
                    .graph
                    .set_attribute(node, TYPE_KEY, CompositeKind::MultiPiece.tag())?;
                state.emit_slot(node, cid, label, mp.pieces.clone())?;
                state.skip_cids(mp.pieces.len());
            }
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
