//! # Selector Engine
//!
//! Evaluates lists of selector strings against a hierarchy or an assembly.
//!
//! - `select_nodes`: union of every selector's matches, stable order
//! - `selected_composite_ids`: selected nodes mapped to composite ids
//! - `selector_for_composite_id`: best-effort inverse lookup
//!
//! A malformed selector never aborts a query. It contributes nothing, is
//! logged at `warn` level and reported in `Selection::warnings`.

use crate::composite::FlatPartitionCollection;
use crate::graph::TraversalOrder;
use crate::path::Selector;
use crate::primitives::{CID_KEY, TYPE_KEY};
use crate::{AssemblyGraph, NodeId, StrataError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Result of `SelectorEngine::select_nodes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Matching nodes, deduplicated, in depth-first pre-order of the graph.
    pub nodes: Vec<NodeId>,
    /// One message per skipped malformed selector.
    pub warnings: Vec<String>,
}

impl Selection {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Stateless selector evaluation over a borrowed graph.
pub struct SelectorEngine;

impl SelectorEngine {
    /// Resolve every selector and return the deduplicated union.
    ///
    /// An empty list yields an empty selection.
    pub fn select_nodes<S: AsRef<str>>(graph: &AssemblyGraph, selectors: &[S]) -> Selection {
        let mut matched = BTreeSet::new();
        let mut warnings = Vec::new();

        for raw in selectors {
            match Selector::parse(raw.as_ref()) {
                Ok(selector) => {
                    let nodes = selector.resolve(graph);
                    debug!(selector = %selector, matches = nodes.len(), "selector resolved");
                    matched.extend(nodes);
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed selector");
                    warnings.push(e.to_string());
                }
            }
        }

        let nodes = graph
            .walk_ordered(NodeId::ROOT, TraversalOrder::DepthFirst)
            .into_iter()
            .filter(|n| matched.contains(n))
            .collect();
        Selection { nodes, warnings }
    }

    /// A hierarchy records the source composite kind on its root.
    #[must_use]
    pub fn is_hierarchy(graph: &AssemblyGraph) -> bool {
        graph.attribute(NodeId::ROOT, TYPE_KEY).is_some()
    }

    /// Resolve selectors to sorted, unique composite ids.
    ///
    /// For a hierarchy the node indices already are composite ids and `data`
    /// must be `None`. For an assembly the indices are slot positions in
    /// `data`, which must be supplied, and are converted through
    /// `FlatPartitionCollection::composite_id_of_slot`.
    pub fn selected_composite_ids<S: AsRef<str>>(
        selectors: &[S],
        graph: &AssemblyGraph,
        data: Option<&FlatPartitionCollection>,
        leaf_nodes_only: bool,
    ) -> Result<Vec<u64>, StrataError> {
        let hierarchy = Self::is_hierarchy(graph);
        match (hierarchy, data) {
            (true, Some(_)) => {
                return Err(StrataError::InvalidUsage(
                    "a hierarchy needs no data collection".to_string(),
                ));
            }
            (false, None) => {
                return Err(StrataError::InvalidUsage(
                    "an assembly needs the data collection it describes".to_string(),
                ));
            }
            _ => {}
        }

        let selection = Self::select_nodes(graph, selectors);
        let mut indices = BTreeSet::new();
        for node in selection.nodes {
            if leaf_nodes_only && !graph.node(node)?.is_leaf() {
                continue;
            }
            indices.extend(graph.dataset_indices(node, true)?);
        }

        let Some(collection) = data else {
            return Ok(indices.into_iter().collect());
        };
        let slots = collection.number_of_partitioned_datasets();
        let mut ids = Vec::with_capacity(indices.len());
        for index in indices {
            match usize::try_from(index) {
                Ok(slot) if slot < slots => ids.push(collection.composite_id_of_slot(slot)),
                _ => warn!(index, slots, "assembly references a missing slot"),
            }
        }
        Ok(ids)
    }

    /// Root-anchored literal path for composite id `cid`, best effort.
    ///
    /// Prefers the deepest node directly owning `cid`, then a node built from
    /// it (`cid` attribute), then the closest preceding node, which encloses
    /// ids that never got a node of their own (partitions, pieces). Returns
    /// `None` only when nothing in the graph precedes `cid`.
    #[must_use]
    pub fn selector_for_composite_id(cid: u64, hierarchy: &AssemblyGraph) -> Option<String> {
        let node = hierarchy
            .find_node_owning_index(cid)
            .or_else(|| Self::node_with_cid_attribute(cid, hierarchy))
            .or_else(|| Self::closest_enclosing(cid, hierarchy))?;
        hierarchy.node_path(node).ok()
    }

    fn node_with_cid_attribute(cid: u64, graph: &AssemblyGraph) -> Option<NodeId> {
        graph
            .walk_ordered(NodeId::ROOT, TraversalOrder::DepthFirst)
            .into_iter()
            .find(|n| cid_attribute(graph, *n) == Some(cid))
    }

    fn closest_enclosing(cid: u64, graph: &AssemblyGraph) -> Option<NodeId> {
        let mut best: Option<(u64, NodeId)> = None;
        for node in graph.walk_ordered(NodeId::ROOT, TraversalOrder::DepthFirst) {
            let Ok(n) = graph.node(node) else {
                continue;
            };
            let candidates = n
                .dataset_indices
                .iter()
                .copied()
                .chain(cid_attribute(graph, node));
            for index in candidates.filter(|i| *i <= cid) {
                if best.is_none_or(|(b, _)| index >= b) {
                    best = Some((index, node));
                }
            }
        }
        best.map(|(_, node)| node)
    }
}

fn cid_attribute(graph: &AssemblyGraph, node: NodeId) -> Option<u64> {
    graph
        .attribute(node, CID_KEY)
        .and_then(|v| v.as_int())
        .and_then(|v| u64::try_from(v).ok())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompositeKind;
    use crate::composite::PartitionedDataSet;

    fn hierarchy() -> AssemblyGraph {
        let mut g = AssemblyGraph::new();
        g.set_attribute(NodeId::ROOT, TYPE_KEY, CompositeKind::MultiBlock.tag())
            .expect("attr");
        g.add_dataset_index(NodeId::ROOT, 0).expect("idx");
        let group = g.add_node("Group", NodeId::ROOT).expect("add");
        g.add_dataset_index(group, 1).expect("idx");
        let leaf = g.add_node("Leaf", group).expect("add");
        g.add_dataset_index(leaf, 2).expect("idx");
        g.set_attribute(leaf, CID_KEY, 2i64).expect("attr");
        g
    }

    #[test]
    fn empty_selector_list_is_empty() {
        let g = hierarchy();
        let selection = SelectorEngine::select_nodes::<&str>(&g, &[]);
        assert!(selection.is_empty());
        assert!(selection.warnings.is_empty());
    }

    #[test]
    fn malformed_entry_is_skipped() {
        let g = hierarchy();
        let selection = SelectorEngine::select_nodes(&g, &["//Leaf", "Leaf["]);
        assert_eq!(selection.nodes, vec![NodeId(2)]);
        assert_eq!(selection.warnings.len(), 1);
    }

    #[test]
    fn union_is_deduplicated_and_ordered() {
        let g = hierarchy();
        let selection = SelectorEngine::select_nodes(&g, &["//Leaf", "/Root", "//Group/Leaf"]);
        assert_eq!(selection.nodes, vec![NodeId(0), NodeId(2)]);
    }

    #[test]
    fn composite_ids_for_hierarchy() {
        let g = hierarchy();
        let ids = SelectorEngine::selected_composite_ids(&["//Group"], &g, None, false)
            .expect("select");
        assert_eq!(ids, vec![1, 2]);
        let leaves = SelectorEngine::selected_composite_ids(&["//*"], &g, None, true)
            .expect("select");
        assert_eq!(leaves, vec![2]);
    }

    #[test]
    fn usage_modes_are_exclusive() {
        let hierarchy = hierarchy();
        let collection = FlatPartitionCollection::new();
        assert!(matches!(
            SelectorEngine::selected_composite_ids(&["/Root"], &hierarchy, Some(&collection), false),
            Err(StrataError::InvalidUsage(_))
        ));

        let assembly = AssemblyGraph::new();
        assert!(matches!(
            SelectorEngine::selected_composite_ids(&["/Root"], &assembly, None, false),
            Err(StrataError::InvalidUsage(_))
        ));
    }

    #[test]
    fn assembly_indices_map_to_slot_composite_ids() {
        let mut collection = FlatPartitionCollection::new();
        collection.push(PartitionedDataSet::with_empty_partitions(2));
        collection.push(PartitionedDataSet::with_empty_partitions(1));

        let mut assembly = AssemblyGraph::new();
        let walls = assembly.add_node("Walls", NodeId::ROOT).expect("add");
        assembly.add_dataset_indices(walls, &[1, 7]).expect("idx");

        let ids = SelectorEngine::selected_composite_ids(&["//Walls"], &assembly, Some(&collection), false)
            .expect("select");
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn selector_for_composite_id_prefers_owner() {
        let g = hierarchy();
        assert_eq!(
            SelectorEngine::selector_for_composite_id(2, &g).as_deref(),
            Some("/Root/Group/Leaf")
        );
        assert_eq!(
            SelectorEngine::selector_for_composite_id(1, &g).as_deref(),
            Some("/Root/Group")
        );
        // No node owns 5: the closest preceding id (2) encloses it.
        assert_eq!(
            SelectorEngine::selector_for_composite_id(5, &g).as_deref(),
            Some("/Root/Group/Leaf")
        );
    }
}
