//! # Restructuring Filters
//!
//! Consumers that rebuild a smaller or larger (hierarchy, collection) pair:
//! - `extract_blocks`: keep only what a selector list picks
//! - `group_timesteps`: concatenate several pairs under `TimeStepN` nodes
//!
//! Both keep the invariant that every hierarchy index is the
//! `composite_index` of at most one output slot.

use crate::builder::BuiltHierarchy;
use crate::composite::FlatPartitionCollection;
use crate::graph::TraversalOrder;
use crate::primitives::{CID_KEY, TYPE_KEY};
use crate::selector::SelectorEngine;
use crate::{AssemblyGraph, AttributeValue, CompositeKind, NodeId, StrataError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Keep the blocks matched by `selectors`, their subtrees and the ancestors
/// needed to reach them.
///
/// Ancestors kept only for connectivity lose their own indices; the root
/// keeps composite id 0.
///
/// Composite ids are not renumbered. Kept nodes carry their source `cid`
/// attribute and indices, and kept slots their source `composite_index`, so
/// the output may have gaps in its id range. Selectors written against the
/// source hierarchy stay valid on the result.
pub fn extract_blocks<S: AsRef<str>>(
    collection: &FlatPartitionCollection,
    hierarchy: &AssemblyGraph,
    selectors: &[S],
) -> Result<BuiltHierarchy, StrataError> {
    if !SelectorEngine::is_hierarchy(hierarchy) {
        return Err(StrataError::InvalidUsage(
            "block extraction needs a hierarchy".to_string(),
        ));
    }
    let selection = SelectorEngine::select_nodes(hierarchy, selectors);

    let mut keep = BTreeSet::new();
    for node in &selection.nodes {
        keep.insert(*node);
        keep.extend(hierarchy.child_nodes(*node, true, TraversalOrder::DepthFirst)?);
    }
    let keep: Vec<NodeId> = keep.into_iter().collect();

    let mut selected: BTreeSet<u64> = BTreeSet::from([0]);
    for node in &keep {
        selected.extend(hierarchy.dataset_indices(*node, false)?);
    }

    let mut subset = hierarchy.subset_copy(&keep)?;
    let identity: BTreeMap<u64, u64> = selected.iter().map(|cid| (*cid, *cid)).collect();
    subset.remap_dataset_indices(&identity, true);

    let mut out = FlatPartitionCollection::new();
    for slot in &collection.slots {
        if slot
            .meta
            .composite_index
            .is_some_and(|cid| selected.contains(&cid))
        {
            out.push(slot.clone());
        }
    }
    out.assembly = collection.assembly.clone();

    debug!(
        selected = selection.nodes.len(),
        kept_nodes = subset.node_count(),
        kept_slots = out.number_of_partitioned_datasets(),
        "blocks extracted"
    );
    Ok(BuiltHierarchy {
        hierarchy: subset,
        collection: out,
    })
}

/// Largest composite id referenced by a (hierarchy, collection) pair.
fn max_composite_id(step: &BuiltHierarchy) -> Result<u64, StrataError> {
    let from_graph = step
        .hierarchy
        .dataset_indices(NodeId::ROOT, true)?
        .into_iter()
        .max()
        .unwrap_or(0);
    let from_slots = step
        .collection
        .slots
        .iter()
        .filter_map(|s| s.meta.composite_index)
        .max()
        .unwrap_or(0);
    Ok(from_graph.max(from_slots))
}

/// Concatenate several steps under a multi-block root.
///
/// Step `n` is grafted under a `TimeStep{n}` node with its composite ids
/// shifted past those of the previous steps. Slots are appended in step order.
pub fn group_timesteps(steps: &[BuiltHierarchy]) -> Result<BuiltHierarchy, StrataError> {
    let mut hierarchy = AssemblyGraph::new();
    hierarchy.set_attribute(NodeId::ROOT, TYPE_KEY, CompositeKind::MultiBlock.tag())?;
    hierarchy.set_attribute(NodeId::ROOT, CID_KEY, 0i64)?;
    hierarchy.add_dataset_index(NodeId::ROOT, 0)?;
    let mut collection = FlatPartitionCollection::new();
    let mut offset: u64 = 1;

    for (n, step) in steps.iter().enumerate() {
        let span = max_composite_id(step)?.saturating_add(1);
        let shift = |cid: u64| cid.saturating_add(offset);

        let mut shifted = step.hierarchy.deep_copy();
        let mut ids = BTreeSet::new();
        for node in shifted.nodes() {
            ids.extend(node.dataset_indices.iter().copied());
        }
        let map: BTreeMap<u64, u64> = ids.into_iter().map(|cid| (cid, shift(cid))).collect();
        shifted.remap_dataset_indices(&map, false);

        let group = hierarchy.add_node(&format!("TimeStep{n}"), NodeId::ROOT)?;
        hierarchy.set_attribute(group, TYPE_KEY, CompositeKind::MultiBlock.tag())?;
        let grafted = hierarchy.add_subtree(group, &shifted)?;

        let mut moved = hierarchy.child_nodes(grafted, true, TraversalOrder::DepthFirst)?;
        moved.push(grafted);
        for node in moved {
            let cid = hierarchy
                .attribute(node, CID_KEY)
                .and_then(|v| v.as_int())
                .and_then(|v| u64::try_from(v).ok());
            if let Some(cid) = cid {
                let shifted_cid = AttributeValue::try_from(shift(cid))?;
                hierarchy.set_attribute(node, CID_KEY, shifted_cid)?;
            }
        }

        for slot in &step.collection.slots {
            let mut copy = slot.clone();
            copy.meta.composite_index = copy.meta.composite_index.map(shift);
            collection.push(copy);
        }
        offset = offset.saturating_add(span);
    }

    debug!(
        steps = steps.len(),
        slots = collection.number_of_partitioned_datasets(),
        "timesteps grouped"
    );
    Ok(BuiltHierarchy {
        hierarchy,
        collection,
    })
}

// =============================================================================
// TESTS
// =============================================================================
