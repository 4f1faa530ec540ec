//! # Composite Round Trip
//!
//! Rebuilds a typed composite dataset from a flat partition collection and
//! the hierarchy describing it. The inverse of `HierarchyBuilder`.
//!
//! Leaves locate their data through the slot whose
//! `MetaData::composite_index` equals the leaf's own dataset index. Block
//! names come from the `label` attribute.
//!
//! AMR geometry (refinement ratios, spacing, origin) is not part of the
//! hierarchy; reconstructed grids use defaults and a warning is logged.

use crate::composite::{
    AmrGrid, AmrLevel, Block, BlockEntry, CompositeDataset, DataSet, FlatPartitionCollection,
    MetaData, MultiBlock, MultiPiece, PartitionedDataSet,
};
use crate::primitives::{LABEL_KEY, MAX_BLOCK_DEPTH, TYPE_KEY};
use crate::{AssemblyGraph, CompositeKind, NodeId, StrataError};
use tracing::warn;

/// Converts hierarchies back into composite datasets.
pub struct CompositeRoundTrip;

impl CompositeRoundTrip {
    /// Dispatch on the root's `vtk_type`.
    ///
    /// Fails with `UnsupportedSourceType` when the root carries no composite
    /// kind the builders produce.
    pub fn from_hierarchy(
        collection: &FlatPartitionCollection,
        hierarchy: &AssemblyGraph,
    ) -> Result<CompositeDataset, StrataError> {
        let tag = hierarchy.attribute_or_default(NodeId::ROOT, TYPE_KEY, -1i64);
        let source = Source {
            collection,
            hierarchy,
        };
        match CompositeKind::from_tag(tag) {
            Some(CompositeKind::MultiBlock) => Ok(CompositeDataset::MultiBlock(
                source.multiblock(NodeId::ROOT, 1)?,
            )),
            Some(CompositeKind::PartitionedCollection) => Ok(
                CompositeDataset::PartitionedCollection(source.partitioned_collection()?),
            ),
            Some(CompositeKind::MultiPiece) => {
                Ok(CompositeDataset::MultiPiece(source.multipiece()?))
            }
            Some(CompositeKind::OverlappingAmr) => Ok(CompositeDataset::Amr(source.amr()?)),
            Some(CompositeKind::PartitionedDataSet) | None => Err(
                StrataError::UnsupportedSourceType(format!("hierarchy root vtk_type {tag}")),
            ),
        }
    }
}

struct Source<'a> {
    collection: &'a FlatPartitionCollection,
    hierarchy: &'a AssemblyGraph,
}

impl Source<'_> {
    fn label(&self, node: NodeId) -> Option<String> {
        self.hierarchy
            .attribute(node, LABEL_KEY)
            .map(ToString::to_string)
    }

    /// Slot built from one of the node's own composite ids.
    fn slot(&self, node: NodeId) -> Result<Option<&PartitionedDataSet>, StrataError> {
        Ok(self
            .hierarchy
            .dataset_indices(node, false)?
            .into_iter()
            .find_map(|cid| self.collection.slot_with_composite_index(cid))
            .and_then(|i| self.collection.partitioned_dataset(i)))
    }

    fn first_dataset(&self, node: NodeId) -> Result<Option<DataSet>, StrataError> {
        Ok(self
            .slot(node)?
            .and_then(|s| s.partitions.first().cloned().flatten()))
    }

    fn partitioned_collection(&self) -> Result<FlatPartitionCollection, StrataError> {
        let mut out = FlatPartitionCollection::new();
        for child in self.hierarchy.children(NodeId::ROOT)? {
            let mut slot = self.slot(*child)?.cloned().unwrap_or_default();
            slot.meta = MetaData {
                name: self.label(*child),
                composite_index: None,
                extra: slot.meta.extra,
            };
            out.push(slot);
        }
        out.assembly = self.collection.assembly.clone();
        Ok(out)
    }

    fn multiblock(&self, node: NodeId, depth: usize) -> Result<MultiBlock, StrataError> {
        if depth > MAX_BLOCK_DEPTH {
            return Err(StrataError::InvalidUsage(format!(
                "hierarchy nesting exceeds {MAX_BLOCK_DEPTH} levels"
            )));
        }
        let mut out = MultiBlock::new();
        for child in self.hierarchy.children(node)? {
            let tag = self.hierarchy.attribute_or_default(*child, TYPE_KEY, -1i64);
            let has_children = !self.hierarchy.node(*child)?.is_leaf();
            let block = match CompositeKind::from_tag(tag) {
                Some(CompositeKind::MultiBlock) => {
                    Block::MultiBlock(self.multiblock(*child, depth.saturating_add(1))?)
                }
                _ if has_children => {
                    Block::MultiBlock(self.multiblock(*child, depth.saturating_add(1))?)
                }
                Some(CompositeKind::MultiPiece) => Block::MultiPiece(MultiPiece {
                    pieces: self
                        .slot(*child)?
                        .map(|s| s.partitions.clone())
                        .unwrap_or_default(),
                }),
                _ => match self.first_dataset(*child)? {
                    Some(ds) => Block::DataSet(ds),
                    None => Block::Empty,
                },
            };
            out.blocks.push(BlockEntry {
                meta: MetaData {
                    name: self.label(*child),
                    ..MetaData::default()
                },
                block,
            });
        }
        Ok(out)
    }

    fn multipiece(&self) -> Result<MultiPiece, StrataError> {
        let pieces = self
            .hierarchy
            .children(NodeId::ROOT)?
            .iter()
            .map(|child| self.first_dataset(*child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MultiPiece { pieces })
    }

    fn amr(&self) -> Result<AmrGrid, StrataError> {
        warn!("AMR refinement ratios, spacing and origin are not stored in the hierarchy; using defaults");
        let mut grid = AmrGrid::default();
        for level in self.hierarchy.children(NodeId::ROOT)? {
            let blocks = self
                .hierarchy
                .children(*level)?
                .iter()
                .map(|block| self.first_dataset(*block))
                .collect::<Result<Vec<_>, _>>()?;
            grid.levels.push(AmrLevel {
                blocks,
                ..AmrLevel::default()
            });
        }
        Ok(grid)
    }
}

// =============================================================================
// TESTS
// =============================================================================
