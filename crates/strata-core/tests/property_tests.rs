//! # Property-Based Tests
//!
//! Invariants of the assembly graph, the selector engine and the builders,
//! checked over generated inputs with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use strata_core::{
    AssemblyGraph, Block, BuildOptions, CompositeDataset, CompositeRoundTrip, DataSet,
    HierarchyBuilder, MultiBlock, MultiPiece, NodeId, SelectorEngine, export_canonical,
    import_canonical,
};

const NAMES: [&str; 4] = ["a", "b", "Block", "Set"];

/// Build a graph from (parent choice, name choice, indices) triples, then add
/// extra edges, skipping the ones that would close a cycle.
fn graph_from(ops: &[(usize, usize, Vec<u64>)], extra_edges: &[(usize, usize)]) -> AssemblyGraph {
    let mut graph = AssemblyGraph::new();
    let mut ids = vec![NodeId::ROOT];
    for (parent, name, indices) in ops {
        let parent = ids[parent % ids.len()];
        let node = graph
            .add_node(NAMES[name % NAMES.len()], parent)
            .expect("add");
        graph.add_dataset_indices(node, indices).expect("idx");
        ids.push(node);
    }
    for (p, c) in extra_edges {
        let parent = ids[p % ids.len()];
        let child = ids[c % ids.len()];
        let _ = graph.add_edge(parent, child);
    }
    graph
}

fn ops_strategy() -> impl Strategy<Value = Vec<(usize, usize, Vec<u64>)>> {
    vec((0usize..64, 0usize..4, vec(0u64..32, 0..4)), 0..40)
}

fn edges_strategy() -> impl Strategy<Value = Vec<(usize, usize)>> {
    vec((0usize..64, 0usize..64), 0..10)
}

fn sorted(mut v: Vec<u64>) -> Vec<u64> {
    v.sort_unstable();
    v
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// The root's subtree indices are exactly every index added anywhere.
    #[test]
    fn index_consistency(ops in ops_strategy(), edges in edges_strategy()) {
        let graph = graph_from(&ops, &edges);
        let added: Vec<u64> = ops.iter().flat_map(|(_, _, idx)| idx.iter().copied()).collect();
        let collected = graph.dataset_indices(NodeId::ROOT, true).expect("indices");
        prop_assert_eq!(sorted(collected), sorted(added));
    }

    /// Remapping through the identity changes nothing.
    #[test]
    fn remap_identity_is_noop(ops in ops_strategy()) {
        let graph = graph_from(&ops, &[]);
        let identity: BTreeMap<u64, u64> = (0..32).map(|i| (i, i)).collect();
        let mut remapped = graph.deep_copy();
        remapped.remap_dataset_indices(&identity, false);
        prop_assert_eq!(remapped, graph);
    }

    /// Cycle rejection keeps the graph a valid DAG.
    #[test]
    fn edges_never_create_cycles(ops in ops_strategy(), edges in edges_strategy()) {
        let graph = graph_from(&ops, &edges);
        prop_assert!(graph.validate().is_ok());
    }

    /// Subset copies reach every kept node from a single root.
    #[test]
    fn subset_copy_connectivity(
        ops in ops_strategy(),
        edges in edges_strategy(),
        picks in vec(0usize..64, 1..8)
    ) {
        let graph = graph_from(&ops, &edges);
        let live: Vec<NodeId> = graph.nodes().map(|n| n.id).collect();
        let keep: Vec<NodeId> = picks.iter().map(|p| live[p % live.len()]).collect();

        let subset = graph.subset_copy(&keep).expect("subset");
        prop_assert!(subset.validate().is_ok());
        for node in &keep {
            prop_assert!(subset.contains_node(*node));
            prop_assert!(!subset.node_paths(*node).expect("paths").is_empty());
        }
        let roots = subset.nodes().filter(|n| n.parents.is_empty()).count();
        prop_assert_eq!(roots, 1);
    }

    /// Same graph, same selectors, same ordered answer.
    #[test]
    fn selection_deterministic(ops in ops_strategy(), edges in edges_strategy()) {
        let graph = graph_from(&ops, &edges);
        let selectors = ["//a/*", "//Block", "/Root/*/Set", "//*[@cid=3]", "//b["];
        let first = SelectorEngine::select_nodes(&graph, &selectors);
        let second = SelectorEngine::select_nodes(&graph, &selectors);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.warnings.len(), 1);
    }

    /// Canonical export imports to an identical graph.
    #[test]
    fn canonical_export_roundtrip(ops in ops_strategy(), edges in edges_strategy()) {
        let graph = graph_from(&ops, &edges);
        let bytes = export_canonical(&graph).expect("export");
        let imported = import_canonical(&bytes).expect("import");
        prop_assert_eq!(imported, graph);
    }

    /// Built multi-blocks reconstruct exactly.
    #[test]
    fn multiblock_round_trip(groups in vec(vec(0u8..3, 0..4), 0..5)) {
        let mut source = MultiBlock::new();
        for (g, leaves) in groups.iter().enumerate() {
            let mut group = MultiBlock::new();
            for (l, kind) in leaves.iter().enumerate() {
                let block = match kind {
                    0 => Block::Empty,
                    1 => Block::DataSet(DataSet::default()),
                    _ => Block::MultiPiece(MultiPiece::with_empty_pieces(l)),
                };
                group.push(Some(&format!("leaf {g}.{l}")), block);
            }
            source.push(Some(&format!("group {g}")), Block::MultiBlock(group));
        }
        let source = CompositeDataset::MultiBlock(source);

        let built = HierarchyBuilder::build(&source, &BuildOptions::default()).expect("build");
        let back = CompositeRoundTrip::from_hierarchy(&built.collection, &built.hierarchy)
            .expect("round trip");
        prop_assert_eq!(back, source);
    }
}
