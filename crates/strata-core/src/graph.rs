//! # Assembly Graph
//!
//! The mutable labeled multi-parent DAG describing the block structure of a
//! composite dataset.
//!
//! Every node carries a name, string-keyed attributes and an ordered list of
//! dataset indices referencing the flat numbering of an external collection.
//! A node may have several parents; the graph stays acyclic and has exactly one
//! root (`NodeId::ROOT`).
//!
//! All storage uses `BTreeMap` so iteration and traversal orders are stable.

use crate::primitives::DEFAULT_ROOT_NAME;
use crate::{AttributeValue, NodeId, StrataError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// =============================================================================
// NODE
// =============================================================================

/// One vertex of an `AssemblyGraph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Positions in the external flat collection. Duplicates are legal.
    pub dataset_indices: Vec<u64>,
    /// Ordered; determines default traversal order.
    pub children: Vec<NodeId>,
    /// Insertion ordered, no duplicates.
    pub parents: Vec<NodeId>,
}

impl Node {
    fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: BTreeMap::new(),
            dataset_indices: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// A node with no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

// =============================================================================
// TRAVERSAL
// =============================================================================

/// Order in which subtree traversals enumerate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TraversalOrder {
    /// Pre-order, children in their stored order.
    #[default]
    DepthFirst,
    /// Level by level, children in their stored order.
    BreadthFirst,
}

/// Callback interface for `AssemblyGraph::visit`.
///
/// Shared subtrees are visited once per traversal, at the first path that
/// reaches them.
pub trait AssemblyVisitor {
    /// Called once for every visited node.
    fn visit(&mut self, graph: &AssemblyGraph, node: NodeId);

    /// Return false to skip `node` and its whole subtree.
    fn should_visit(&self, _graph: &AssemblyGraph, _node: NodeId) -> bool {
        true
    }

    /// Depth-first only: called after `visit`, before the children.
    fn begin_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {}

    /// Depth-first only: called after all children were handled.
    fn end_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {}
}

// =============================================================================
// TYPED ATTRIBUTE LOOKUP
// =============================================================================

/// Conversion used by `AssemblyGraph::attribute_or_default`.
pub trait FromAttribute: Sized {
    fn from_attribute(value: &AttributeValue) -> Option<Self>;
}

impl FromAttribute for String {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        Some(value.to_string())
    }
}

impl FromAttribute for i64 {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        value.as_int()
    }
}

impl FromAttribute for u64 {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        value.as_int().and_then(|v| u64::try_from(v).ok())
    }
}

impl FromAttribute for f64 {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        value.as_float()
    }
}

impl FromAttribute for bool {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        value.as_bool()
    }
}

impl FromAttribute for AttributeValue {
    fn from_attribute(value: &AttributeValue) -> Option<Self> {
        Some(value.clone())
    }
}

// =============================================================================
// NAME VALIDATION
// =============================================================================

/// Turn arbitrary display text into a name usable as a selector path step.
///
/// Keeps `[A-Za-z0-9_]`, drops everything else and prefixes `_` when the result
/// would start with a digit. Returns an empty string when nothing survives.
#[must_use]
pub fn make_valid_node_name(text: &str) -> String {
    let mut name: String = text
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// True if `name` is unchanged by [`make_valid_node_name`] and non-empty.
#[must_use]
pub fn is_node_name_valid(name: &str) -> bool {
    !name.is_empty() && make_valid_node_name(name) == name
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// The assembly graph.
///
/// A plain value with single-owner semantics: clone it (`deep_copy`) to stage
/// edits, share `&AssemblyGraph` for concurrent read-only queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "SerializableGraph", try_from = "SerializableGraph")]
pub struct AssemblyGraph {
    /// Node storage: NodeId -> Node
    nodes: BTreeMap<NodeId, Node>,

    /// Next available NodeId; never decremented.
    next_node_id: u64,
}

impl Default for AssemblyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl AssemblyGraph {
    /// Create a graph holding only a root named `Root`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root_name(DEFAULT_ROOT_NAME)
    }

    /// Create a graph holding only a root with the given name.
    #[must_use]
    pub fn with_root_name(name: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::ROOT, Node::new(NodeId::ROOT, name));
        Self {
            nodes,
            next_node_id: NodeId::ROOT.0.saturating_add(1),
        }
    }

    /// Rebuild a graph from raw nodes, checking every structural invariant.
    pub fn from_parts(nodes: Vec<Node>, next_node_id: u64) -> Result<Self, StrataError> {
        let mut graph = Self {
            nodes: BTreeMap::new(),
            next_node_id,
        };
        for node in nodes {
            if node.id.0 >= graph.next_node_id {
                graph.next_node_id = node.id.0.saturating_add(1);
            }
            graph.nodes.insert(node.id, node);
        }
        graph.validate()?;
        Ok(graph)
    }

    /// The well-known root id, identical for every graph.
    #[must_use]
    pub const fn root_node() -> NodeId {
        NodeId::ROOT
    }

    #[must_use]
    pub fn root_node_name(&self) -> &str {
        self.nodes
            .get(&NodeId::ROOT)
            .map(|n| n.name.as_str())
            .unwrap_or(DEFAULT_ROOT_NAME)
    }

    pub fn set_root_node_name(&mut self, name: &str) {
        if let Some(root) = self.nodes.get_mut(&NodeId::ROOT) {
            root.name = name.to_string();
        }
    }

    /// All live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The id the next inserted node will receive.
    #[must_use]
    pub fn next_node_id(&self) -> u64 {
        self.next_node_id
    }

    #[must_use]
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Borrow a live node.
    pub fn node(&self, id: NodeId) -> Result<&Node, StrataError> {
        self.nodes
            .get(&id)
            .ok_or(StrataError::InvalidNodeReference(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StrataError> {
        self.nodes
            .get_mut(&id)
            .ok_or(StrataError::InvalidNodeReference(id))
    }

    fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        id
    }

    // =========================================================================
    // STRUCTURE
    // =========================================================================

    /// Append a new child named `name` under `parent`.
    pub fn add_node(&mut self, name: &str, parent: NodeId) -> Result<NodeId, StrataError> {
        if !self.contains_node(parent) {
            return Err(StrataError::InvalidParent(parent));
        }
        let id = self.allocate_id();
        let mut node = Node::new(id, name);
        node.parents.push(parent);
        self.nodes.insert(id, node);
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Append several children under `parent`, in order.
    pub fn add_nodes<S: AsRef<str>>(
        &mut self,
        names: &[S],
        parent: NodeId,
    ) -> Result<Vec<NodeId>, StrataError> {
        if !self.contains_node(parent) {
            return Err(StrataError::InvalidParent(parent));
        }
        names
            .iter()
            .map(|name| self.add_node(name.as_ref(), parent))
            .collect()
    }

    /// Add an extra parent-child edge, making `child` reachable through `parent`.
    ///
    /// Adding an existing edge is a no-op. Fails with `CycleDetected` if `parent`
    /// is `child` or one of its descendants.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<(), StrataError> {
        self.node(parent)?;
        self.node(child)?;
        if child.is_root() {
            return Err(StrataError::InvalidUsage(
                "the root node cannot have parents".to_string(),
            ));
        }
        if self.node(parent)?.children.contains(&child) {
            return Ok(());
        }
        if self.is_descendant_or_self(child, parent) {
            return Err(StrataError::CycleDetected { parent, child });
        }
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parents.push(parent);
        Ok(())
    }

    /// Remove one parent-child edge. Returns whether the edge existed.
    ///
    /// The child stays in the graph even if this was its last parent; call
    /// `prune_unreachable` to drop orphans.
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId) -> Result<bool, StrataError> {
        self.node(child)?;
        let parent_node = self.node_mut(parent)?;
        let before = parent_node.children.len();
        parent_node.children.retain(|c| *c != child);
        if parent_node.children.len() == before {
            return Ok(false);
        }
        self.node_mut(child)?.parents.retain(|p| *p != parent);
        Ok(true)
    }

    /// Remove `id` and every descendant not reachable through another parent.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), StrataError> {
        self.node(id)?;
        if id.is_root() {
            return Err(StrataError::InvalidUsage(
                "the root node cannot be removed".to_string(),
            ));
        }

        let mut pending = VecDeque::from([id]);
        while let Some(current) = pending.pop_front() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            for parent in &node.parents {
                if let Some(p) = self.nodes.get_mut(parent) {
                    p.children.retain(|c| *c != current);
                }
            }
            for child in &node.children {
                if let Some(c) = self.nodes.get_mut(child) {
                    c.parents.retain(|p| *p != current);
                    if c.parents.is_empty() {
                        pending.push_back(*child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop every node not reachable from the root. Returns how many were removed.
    pub fn prune_unreachable(&mut self) -> usize {
        let reachable: BTreeSet<NodeId> = self.walk(NodeId::ROOT, TraversalOrder::DepthFirst);
        let doomed: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !reachable.contains(id))
            .copied()
            .collect();
        for id in &doomed {
            self.nodes.remove(id);
        }
        for node in self.nodes.values_mut() {
            node.parents.retain(|p| reachable.contains(p));
            node.children.retain(|c| reachable.contains(c));
        }
        doomed.len()
    }

    /// Deep-copy all of `other` under `target_parent`. Returns the id of the
    /// copy of `other`'s root.
    ///
    /// Fresh ids are assigned; names, attributes, child order and dataset
    /// indices are copied verbatim.
    pub fn add_subtree(
        &mut self,
        target_parent: NodeId,
        other: &AssemblyGraph,
    ) -> Result<NodeId, StrataError> {
        self.add_subtree_from(target_parent, other, NodeId::ROOT)
    }

    /// Like `add_subtree`, copying the subtree of `other` rooted at `other_node`.
    pub fn add_subtree_from(
        &mut self,
        target_parent: NodeId,
        other: &AssemblyGraph,
        other_node: NodeId,
    ) -> Result<NodeId, StrataError> {
        if !self.contains_node(target_parent) {
            return Err(StrataError::InvalidParent(target_parent));
        }
        other.node(other_node)?;

        let order = other.walk_ordered(other_node, TraversalOrder::DepthFirst);
        let mut mapping: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        for old in &order {
            let source = other.node(*old)?;
            let id = self.allocate_id();
            let mut copy = Node::new(id, source.name.clone());
            copy.attributes = source.attributes.clone();
            copy.dataset_indices = source.dataset_indices.clone();
            self.nodes.insert(id, copy);
            mapping.insert(*old, id);
        }

        // Edges inside the copied subtree, in the source child order.
        for old in &order {
            let source = other.node(*old)?;
            let Some(&new_parent) = mapping.get(old) else {
                continue;
            };
            for child in &source.children {
                if let Some(&new_child) = mapping.get(child) {
                    self.node_mut(new_parent)?.children.push(new_child);
                    self.node_mut(new_child)?.parents.push(new_parent);
                }
            }
        }

        let new_root = mapping
            .get(&other_node)
            .copied()
            .ok_or(StrataError::InvalidNodeReference(other_node))?;
        self.node_mut(target_parent)?.children.push(new_root);
        self.node_mut(new_root)?.parents.push(target_parent);
        Ok(new_root)
    }

    /// Full copy with identical ids, used as a staging copy before mutation.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    /// Copy keeping only `keep` plus every ancestor needed to reach them.
    ///
    /// Ids, names, attributes and dataset indices of retained nodes are
    /// preserved. Edges survive when both ends are retained.
    pub fn subset_copy(&self, keep: &[NodeId]) -> Result<Self, StrataError> {
        let mut retained = BTreeSet::from([NodeId::ROOT]);
        let mut pending: VecDeque<NodeId> = VecDeque::new();
        for id in keep {
            self.node(*id)?;
            if retained.insert(*id) {
                pending.push_back(*id);
            }
        }
        while let Some(current) = pending.pop_front() {
            for parent in &self.node(current)?.parents {
                if retained.insert(*parent) {
                    pending.push_back(*parent);
                }
            }
        }

        let mut copy = Self {
            nodes: BTreeMap::new(),
            next_node_id: self.next_node_id,
        };
        for id in &retained {
            let mut node = self.node(*id)?.clone();
            node.children.retain(|c| retained.contains(c));
            node.parents.retain(|p| retained.contains(p));
            copy.nodes.insert(*id, node);
        }
        // Ancestors whose own chain to the root was cut away are dropped.
        copy.prune_unreachable();
        Ok(copy)
    }

    // =========================================================================
    // NAMES & ATTRIBUTES
    // =========================================================================

    pub fn node_name(&self, id: NodeId) -> Result<&str, StrataError> {
        Ok(self.node(id)?.name.as_str())
    }

    pub fn set_node_name(&mut self, id: NodeId, name: &str) -> Result<(), StrataError> {
        self.node_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), StrataError> {
        self.node_mut(id)?
            .attributes
            .insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn remove_attribute(
        &mut self,
        id: NodeId,
        key: &str,
    ) -> Result<Option<AttributeValue>, StrataError> {
        Ok(self.node_mut(id)?.attributes.remove(key))
    }

    /// Raw attribute lookup; `None` when the node or key is absent.
    #[must_use]
    pub fn attribute(&self, id: NodeId, key: &str) -> Option<&AttributeValue> {
        self.nodes.get(&id)?.attributes.get(key)
    }

    /// Typed lookup that never fails: returns `default` when the node is not
    /// live, the key is absent or the stored value does not convert.
    #[must_use]
    pub fn attribute_or_default<T: FromAttribute>(&self, id: NodeId, key: &str, default: T) -> T {
        self.attribute(id, key)
            .and_then(T::from_attribute)
            .unwrap_or(default)
    }

    // =========================================================================
    // DATASET INDICES
    // =========================================================================

    pub fn add_dataset_index(&mut self, id: NodeId, index: u64) -> Result<(), StrataError> {
        self.node_mut(id)?.dataset_indices.push(index);
        Ok(())
    }

    pub fn add_dataset_indices(&mut self, id: NodeId, indices: &[u64]) -> Result<(), StrataError> {
        self.node_mut(id)?.dataset_indices.extend_from_slice(indices);
        Ok(())
    }

    /// Append `start, start + 1, ..., start + count - 1`.
    pub fn add_dataset_index_range(
        &mut self,
        id: NodeId,
        start: u64,
        count: u64,
    ) -> Result<(), StrataError> {
        let node = self.node_mut(id)?;
        node.dataset_indices
            .extend((0..count).map(|offset| start.saturating_add(offset)));
        Ok(())
    }

    /// Indices owned by `id`, or by `id` and its whole subtree (pre-order,
    /// each shared node counted once, duplicate indices kept).
    pub fn dataset_indices(
        &self,
        id: NodeId,
        traverse_subtree: bool,
    ) -> Result<Vec<u64>, StrataError> {
        let node = self.node(id)?;
        if !traverse_subtree {
            return Ok(node.dataset_indices.clone());
        }
        let mut out = Vec::new();
        for visited in self.walk_ordered(id, TraversalOrder::DepthFirst) {
            out.extend_from_slice(&self.node(visited)?.dataset_indices);
        }
        Ok(out)
    }

    pub fn remove_all_dataset_indices(
        &mut self,
        id: NodeId,
        traverse_subtree: bool,
    ) -> Result<(), StrataError> {
        self.node(id)?;
        let targets = if traverse_subtree {
            self.walk_ordered(id, TraversalOrder::DepthFirst)
        } else {
            vec![id]
        };
        for target in targets {
            self.node_mut(target)?.dataset_indices.clear();
        }
        Ok(())
    }

    /// Rewrite every index of every node through `map`.
    ///
    /// Unmapped indices are kept unchanged, or dropped when `remove_unmapped`.
    pub fn remap_dataset_indices(&mut self, map: &BTreeMap<u64, u64>, remove_unmapped: bool) {
        for node in self.nodes.values_mut() {
            node.dataset_indices = node
                .dataset_indices
                .iter()
                .filter_map(|index| match map.get(index) {
                    Some(mapped) => Some(*mapped),
                    None if remove_unmapped => None,
                    None => Some(*index),
                })
                .collect();
        }
    }

    /// Node that directly owns `index`, deepest first when several do.
    ///
    /// Depth is the longest path from the root, so a shared node counts at
    /// its deepest position. Ties go to the earlier node in pre-order.
    #[must_use]
    pub fn find_node_owning_index(&self, index: u64) -> Option<NodeId> {
        let depths = self.longest_depths();
        let mut best: Option<(usize, NodeId)> = None;
        for id in self.walk_ordered(NodeId::ROOT, TraversalOrder::DepthFirst) {
            let owns = self
                .nodes
                .get(&id)
                .is_some_and(|n| n.dataset_indices.contains(&index));
            let depth = depths.get(&id).copied().unwrap_or(0);
            if owns && best.is_none_or(|(d, _)| depth > d) {
                best = Some((depth, id));
            }
        }
        best.map(|(_, id)| id)
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    pub fn children(&self, id: NodeId) -> Result<&[NodeId], StrataError> {
        Ok(&self.node(id)?.children)
    }

    pub fn parents(&self, id: NodeId) -> Result<&[NodeId], StrataError> {
        Ok(&self.node(id)?.parents)
    }

    /// First parent, `None` for the root or an orphan.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, StrataError> {
        Ok(self.node(id)?.parents.first().copied())
    }

    pub fn number_of_children(&self, id: NodeId) -> Result<usize, StrataError> {
        Ok(self.node(id)?.children.len())
    }

    /// The `index`-th child of `id`.
    pub fn child(&self, id: NodeId, index: usize) -> Result<NodeId, StrataError> {
        self.node(id)?.children.get(index).copied().ok_or_else(|| {
            StrataError::InvalidUsage(format!("node {id} has no child at position {index}"))
        })
    }

    /// Descendants of `id` (not `id` itself), each once, in `order`.
    pub fn child_nodes(
        &self,
        id: NodeId,
        traverse_subtree: bool,
        order: TraversalOrder,
    ) -> Result<Vec<NodeId>, StrataError> {
        let node = self.node(id)?;
        if !traverse_subtree {
            return Ok(node.children.clone());
        }
        let mut all = self.walk_ordered(id, order);
        all.retain(|n| *n != id);
        Ok(all)
    }

    /// First node named `name`, searching from the root in `order`.
    #[must_use]
    pub fn find_first_node_with_name(&self, name: &str, order: TraversalOrder) -> Option<NodeId> {
        self.walk_ordered(NodeId::ROOT, order)
            .into_iter()
            .find(|id| self.nodes.get(id).is_some_and(|n| n.name == name))
    }

    /// Path along first parents, e.g. `/Root/Blocks/Block2`.
    pub fn node_path(&self, id: NodeId) -> Result<String, StrataError> {
        let mut steps = vec![self.node(id)?.name.as_str()];
        let mut current = id;
        // Bounded by node count so a corrupted parent chain cannot loop.
        for _ in 0..self.nodes.len() {
            let Some(parent) = self.node(current)?.parents.first().copied() else {
                break;
            };
            steps.push(self.node(parent)?.name.as_str());
            current = parent;
        }
        steps.reverse();
        Ok(format!("/{}", steps.join("/")))
    }

    /// Every root-anchored path reaching `id` (one per parent chain).
    pub fn node_paths(&self, id: NodeId) -> Result<Vec<String>, StrataError> {
        let node = self.node(id)?;
        if id.is_root() {
            return Ok(vec![format!("/{}", node.name)]);
        }
        let mut paths = Vec::new();
        for parent in &node.parents {
            for prefix in self.node_paths(*parent)? {
                paths.push(format!("{prefix}/{}", node.name));
            }
        }
        Ok(paths)
    }

    /// True if `node` is `ancestor` or lies in its subtree.
    #[must_use]
    pub fn is_descendant_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        if ancestor == node {
            return true;
        }
        self.walk(ancestor, TraversalOrder::DepthFirst)
            .contains(&node)
    }

    /// Run `visitor` over `id` and its subtree.
    pub fn visit<V: AssemblyVisitor + ?Sized>(
        &self,
        id: NodeId,
        visitor: &mut V,
        order: TraversalOrder,
    ) -> Result<(), StrataError> {
        self.node(id)?;
        let mut seen = BTreeSet::new();
        match order {
            TraversalOrder::DepthFirst => self.visit_depth_first(id, visitor, &mut seen),
            TraversalOrder::BreadthFirst => {
                let mut queue = VecDeque::from([id]);
                seen.insert(id);
                while let Some(current) = queue.pop_front() {
                    if !visitor.should_visit(self, current) {
                        continue;
                    }
                    visitor.visit(self, current);
                    for child in self.children(current)? {
                        if seen.insert(*child) {
                            queue.push_back(*child);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn visit_depth_first<V: AssemblyVisitor + ?Sized>(
        &self,
        id: NodeId,
        visitor: &mut V,
        seen: &mut BTreeSet<NodeId>,
    ) -> Result<(), StrataError> {
        if !seen.insert(id) || !visitor.should_visit(self, id) {
            return Ok(());
        }
        visitor.visit(self, id);
        visitor.begin_sub_tree(self, id);
        for child in self.children(id)? {
            self.visit_depth_first(*child, visitor, seen)?;
        }
        visitor.end_sub_tree(self, id);
        Ok(())
    }

    // =========================================================================
    // INTERNAL WALKS
    // =========================================================================

    fn walk(&self, start: NodeId, order: TraversalOrder) -> BTreeSet<NodeId> {
        self.walk_ordered(start, order).into_iter().collect()
    }

    /// `start` and its subtree, each node once, in `order`.
    pub(crate) fn walk_ordered(&self, start: NodeId, order: TraversalOrder) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains_node(start) {
            return out;
        }
        let mut seen = BTreeSet::new();
        match order {
            TraversalOrder::DepthFirst => {
                let mut stack = vec![start];
                while let Some(current) = stack.pop() {
                    if !seen.insert(current) {
                        continue;
                    }
                    out.push(current);
                    if let Some(node) = self.nodes.get(&current) {
                        stack.extend(node.children.iter().rev().copied());
                    }
                }
            }
            TraversalOrder::BreadthFirst => {
                let mut queue = VecDeque::from([start]);
                seen.insert(start);
                while let Some(current) = queue.pop_front() {
                    out.push(current);
                    if let Some(node) = self.nodes.get(&current) {
                        for child in &node.children {
                            if seen.insert(*child) {
                                queue.push_back(*child);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Longest root-to-node path length of every reachable node.
    ///
    /// Relaxes edges in topological order over the reachable subgraph, so
    /// each edge is seen once however many paths share it.
    fn longest_depths(&self) -> BTreeMap<NodeId, usize> {
        let reachable = self.walk(NodeId::ROOT, TraversalOrder::DepthFirst);
        let mut pending: BTreeMap<NodeId, usize> = reachable
            .iter()
            .map(|id| {
                let parents = self.nodes.get(id).map_or(0, |n| {
                    n.parents.iter().filter(|p| reachable.contains(p)).count()
                });
                (*id, parents)
            })
            .collect();

        let mut depths = BTreeMap::from([(NodeId::ROOT, 0usize)]);
        let mut ready = VecDeque::from([NodeId::ROOT]);
        while let Some(current) = ready.pop_front() {
            let depth = depths.get(&current).copied().unwrap_or(0);
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for child in &node.children {
                let entry = depths.entry(*child).or_insert(0);
                *entry = (*entry).max(depth.saturating_add(1));
                if let Some(count) = pending.get_mut(child) {
                    if *count == 1 {
                        ready.push_back(*child);
                    }
                    *count = count.saturating_sub(1);
                }
            }
        }
        depths
    }

    // =========================================================================
    // INVARIANTS
    // =========================================================================

    /// Check the structural invariants: a parentless root, symmetric live
    /// parent/child references, id allocator ahead of every id, no cycles.
    pub fn validate(&self) -> Result<(), StrataError> {
        let root = self
            .nodes
            .get(&NodeId::ROOT)
            .ok_or(StrataError::InvalidNodeReference(NodeId::ROOT))?;
        if !root.parents.is_empty() {
            return Err(StrataError::InvalidUsage(
                "the root node has parents".to_string(),
            ));
        }
        for (id, node) in &self.nodes {
            if node.id != *id || id.0 >= self.next_node_id {
                return Err(StrataError::InvalidNodeReference(*id));
            }
            if has_duplicates(&node.children) {
                return Err(StrataError::InvalidUsage(format!(
                    "node {id} lists a child twice"
                )));
            }
            if has_duplicates(&node.parents) {
                return Err(StrataError::InvalidUsage(format!(
                    "node {id} lists a parent twice"
                )));
            }
            for child in &node.children {
                let c = self
                    .nodes
                    .get(child)
                    .ok_or(StrataError::InvalidNodeReference(*child))?;
                if !c.parents.contains(id) {
                    return Err(StrataError::InvalidNodeReference(*child));
                }
            }
            for parent in &node.parents {
                let p = self
                    .nodes
                    .get(parent)
                    .ok_or(StrataError::InvalidNodeReference(*parent))?;
                if !p.children.contains(id) {
                    return Err(StrataError::InvalidNodeReference(*parent));
                }
            }
        }
        self.check_acyclic()
    }

    /// Kahn's algorithm. Expects duplicate-free, symmetric edge lists.
    fn check_acyclic(&self) -> Result<(), StrataError> {
        let mut in_degree: BTreeMap<NodeId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.parents.len()))
            .collect();
        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut removed = 0usize;
        while let Some(current) = ready.pop_front() {
            removed = removed.saturating_add(1);
            for child in &self.node(current)?.children {
                match in_degree.get_mut(child) {
                    Some(d) if *d > 0 => {
                        *d -= 1;
                        if *d == 0 {
                            ready.push_back(*child);
                        }
                    }
                    _ => return Err(StrataError::InvalidNodeReference(*child)),
                }
            }
        }
        if removed == self.nodes.len() {
            return Ok(());
        }

        // Some node on a cycle still has a pending parent that is also on it.
        let pending = |id: &NodeId| in_degree.get(id).is_some_and(|d| *d > 0);
        let child = in_degree
            .iter()
            .find(|(_, d)| **d > 0)
            .map(|(id, _)| *id)
            .unwrap_or(NodeId::ROOT);
        let parent = self
            .node(child)?
            .parents
            .iter()
            .copied()
            .find(|p| pending(p))
            .unwrap_or(NodeId::ROOT);
        Err(StrataError::CycleDetected { parent, child })
    }
}

fn has_duplicates(ids: &[NodeId]) -> bool {
    let mut seen = BTreeSet::new();
    ids.iter().any(|id| !seen.insert(*id))
}

// =============================================================================
// SERIALIZATION SUPPORT
// =============================================================================

/// Serializable representation of the graph for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializableGraph {
    pub nodes: Vec<Node>,
    pub next_node_id: u64,
}

impl From<&AssemblyGraph> for SerializableGraph {
    fn from(graph: &AssemblyGraph) -> Self {
        Self {
            nodes: graph.nodes.values().cloned().collect(),
            next_node_id: graph.next_node_id,
        }
    }
}

impl From<AssemblyGraph> for SerializableGraph {
    fn from(graph: AssemblyGraph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            next_node_id: graph.next_node_id,
        }
    }
}

impl TryFrom<SerializableGraph> for AssemblyGraph {
    type Error = StrataError;

    fn try_from(sg: SerializableGraph) -> Result<Self, Self::Error> {
        AssemblyGraph::from_parts(sg.nodes, sg.next_node_id)
            .map_err(|e| StrataError::DeserializationError(e.to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Root -> {A -> {A1, A2}, B}
    fn sample() -> (AssemblyGraph, NodeId, NodeId, NodeId, NodeId) {
        let mut graph = AssemblyGraph::new();
        let a = graph.add_node("A", NodeId::ROOT).expect("add");
        let b = graph.add_node("B", NodeId::ROOT).expect("add");
        let ids = graph.add_nodes(&["A1", "A2"], a).expect("add");
        (graph, a, b, ids[0], ids[1])
    }

    #[test]
    fn new_graph_has_only_root() {
        let graph = AssemblyGraph::new();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(AssemblyGraph::root_node(), NodeId(0));
        assert_eq!(graph.root_node_name(), "Root");
        assert_eq!(graph.node_path(NodeId::ROOT).expect("path"), "/Root");
    }

    #[test]
    fn add_node_appends_in_order() {
        let (graph, a, b, a1, a2) = sample();
        assert_eq!(graph.children(NodeId::ROOT).expect("children"), &[a, b]);
        assert_eq!(graph.number_of_children(a).expect("count"), 2);
        assert_eq!(graph.child(a, 1).expect("child"), a2);
        assert_eq!(graph.parent(a1).expect("parent"), Some(a));
        assert!(graph.child(a, 2).is_err());
    }

    #[test]
    fn add_node_rejects_dead_parent() {
        let mut graph = AssemblyGraph::new();
        let result = graph.add_node("X", NodeId(42));
        assert!(matches!(result, Err(StrataError::InvalidParent(NodeId(42)))));
        assert!(matches!(
            graph.add_nodes(&["X"], NodeId(42)),
            Err(StrataError::InvalidParent(_))
        ));
    }

    #[test]
    fn ids_are_never_reused() {
        let (mut graph, _, b, _, _) = sample();
        graph.remove_node(b).expect("remove");
        let c = graph.add_node("C", NodeId::ROOT).expect("add");
        assert!(c.0 > b.0);
        assert!(matches!(
            graph.node(b),
            Err(StrataError::InvalidNodeReference(_))
        ));
    }

    #[test]
    fn dataset_indices_own_and_subtree() {
        let (mut graph, a, _, a1, a2) = sample();
        graph.add_dataset_index(a, 1).expect("add");
        graph.add_dataset_indices(a1, &[2, 2]).expect("add");
        graph.add_dataset_index_range(a2, 5, 3).expect("add");

        assert_eq!(graph.dataset_indices(a, false).expect("own"), vec![1]);
        assert_eq!(
            graph.dataset_indices(a, true).expect("subtree"),
            vec![1, 2, 2, 5, 6, 7]
        );
    }

    #[test]
    fn shared_subtree_counted_once() {
        let (mut graph, a, b, a1, _) = sample();
        graph.add_dataset_index(a1, 9).expect("add");
        graph.add_edge(b, a1).expect("edge");

        assert_eq!(graph.parents(a1).expect("parents"), &[a, b]);
        assert_eq!(
            graph.dataset_indices(NodeId::ROOT, true).expect("all"),
            vec![9]
        );
        let paths = graph.node_paths(a1).expect("paths");
        assert_eq!(paths, vec!["/Root/A/A1".to_string(), "/Root/B/A1".to_string()]);
    }

    #[test]
    fn add_edge_rejects_cycles() {
        let (mut graph, a, _, a1, _) = sample();
        assert!(matches!(
            graph.add_edge(a1, a),
            Err(StrataError::CycleDetected { .. })
        ));
        assert!(matches!(
            graph.add_edge(a, a),
            Err(StrataError::CycleDetected { .. })
        ));
        assert!(graph.add_edge(a, NodeId::ROOT).is_err());
        // Existing edge is a no-op.
        graph.add_edge(a, a1).expect("edge");
        assert_eq!(graph.number_of_children(a).expect("count"), 2);
        graph.validate().expect("still valid");
    }

    #[test]
    fn remove_edge_and_prune() {
        let (mut graph, a, _, a1, _) = sample();
        assert!(graph.remove_edge(a, a1).expect("remove"));
        assert!(!graph.remove_edge(a, a1).expect("remove again"));
        assert!(graph.contains_node(a1));
        assert_eq!(graph.prune_unreachable(), 1);
        assert!(!graph.contains_node(a1));
        graph.validate().expect("valid");
    }

    #[test]
    fn remove_node_keeps_shared_descendants() {
        let (mut graph, a, b, a1, a2) = sample();
        graph.add_edge(b, a1).expect("edge");
        graph.remove_node(a).expect("remove");

        assert!(!graph.contains_node(a));
        assert!(!graph.contains_node(a2));
        assert!(graph.contains_node(a1));
        assert_eq!(graph.parents(a1).expect("parents"), &[b]);
        assert!(graph.remove_node(NodeId::ROOT).is_err());
        graph.validate().expect("valid");
    }

    #[test]
    fn remap_drops_unmapped_when_asked() {
        let (mut graph, a, b, _, _) = sample();
        graph.add_dataset_indices(a, &[0, 1]).expect("add");
        graph.add_dataset_index(b, 2).expect("add");

        let map = BTreeMap::from([(0, 10), (2, 12)]);
        let mut kept = graph.deep_copy();
        kept.remap_dataset_indices(&map, false);
        assert_eq!(kept.dataset_indices(a, false).expect("a"), vec![10, 1]);

        graph.remap_dataset_indices(&map, true);
        assert_eq!(graph.dataset_indices(a, false).expect("a"), vec![10]);
        assert_eq!(graph.dataset_indices(b, false).expect("b"), vec![12]);
    }

    #[test]
    fn subset_copy_keeps_ancestors() {
        let (graph, a, b, a1, a2) = sample();
        let subset = graph.subset_copy(&[a2]).expect("subset");

        assert!(subset.contains_node(a));
        assert!(subset.contains_node(a2));
        assert!(!subset.contains_node(a1));
        assert!(!subset.contains_node(b));
        assert_eq!(subset.children(a).expect("children"), &[a2]);
        assert_eq!(subset.next_node_id(), graph.next_node_id());
        subset.validate().expect("valid");
        assert!(graph.subset_copy(&[NodeId(99)]).is_err());
    }

    #[test]
    fn add_subtree_copies_with_fresh_ids() {
        let (source, _, _, a1, _) = sample();
        let mut target = AssemblyGraph::with_root_name("Timesteps");
        let mut source = source;
        source.set_attribute(a1, "label", "first").expect("attr");
        source.add_dataset_index(a1, 3).expect("add");

        let copied = target.add_subtree(NodeId::ROOT, &source).expect("graft");
        assert_eq!(target.node_count(), 1 + source.node_count());
        assert_eq!(target.node_name(copied).expect("name"), "Root");

        let found = target
            .find_first_node_with_name("A1", TraversalOrder::DepthFirst)
            .expect("found");
        assert_eq!(
            target.attribute_or_default(found, "label", String::new()),
            "first"
        );
        assert_eq!(target.dataset_indices(found, false).expect("own"), vec![3]);
        assert_eq!(
            target.node_path(found).expect("path"),
            "/Timesteps/Root/A/A1"
        );
        target.validate().expect("valid");
    }

    #[test]
    fn attribute_or_default_never_fails() {
        let (mut graph, a, _, _, _) = sample();
        graph.set_attribute(a, "vtk_type", 13i64).expect("set");
        assert_eq!(graph.attribute_or_default(a, "vtk_type", -1i64), 13);
        assert_eq!(graph.attribute_or_default(a, "missing", -1i64), -1);
        assert_eq!(graph.attribute_or_default(NodeId(77), "vtk_type", -1i64), -1);
        assert_eq!(
            graph.attribute_or_default(a, "vtk_type", String::new()),
            "13"
        );
    }

    #[test]
    fn traversal_orders() {
        let (graph, a, b, a1, a2) = sample();
        assert_eq!(
            graph
                .child_nodes(NodeId::ROOT, true, TraversalOrder::DepthFirst)
                .expect("dfs"),
            vec![a, a1, a2, b]
        );
        assert_eq!(
            graph
                .child_nodes(NodeId::ROOT, true, TraversalOrder::BreadthFirst)
                .expect("bfs"),
            vec![a, b, a1, a2]
        );
        assert_eq!(
            graph
                .child_nodes(NodeId::ROOT, false, TraversalOrder::DepthFirst)
                .expect("direct"),
            vec![a, b]
        );
    }

    struct Recorder {
        events: Vec<String>,
        skip: Option<NodeId>,
    }

    impl AssemblyVisitor for Recorder {
        fn visit(&mut self, graph: &AssemblyGraph, node: NodeId) {
            let name = graph.node_name(node).unwrap_or_default();
            self.events.push(name.to_string());
        }

        fn should_visit(&self, _graph: &AssemblyGraph, node: NodeId) -> bool {
            self.skip != Some(node)
        }

        fn begin_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {
            self.events.push("(".to_string());
        }

        fn end_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {
            self.events.push(")".to_string());
        }
    }

    #[test]
    fn visitor_hooks_and_skip() {
        let (graph, a, _, _, _) = sample();
        let mut recorder = Recorder {
            events: Vec::new(),
            skip: Some(a),
        };
        graph
            .visit(NodeId::ROOT, &mut recorder, TraversalOrder::DepthFirst)
            .expect("visit");
        assert_eq!(recorder.events.join(""), "Root(B())");
    }

    #[test]
    fn valid_node_names() {
        assert_eq!(make_valid_node_name("Unnamed block ID: 1"), "UnnamedblockID1");
        assert_eq!(make_valid_node_name("3D blocks"), "_3Dblocks");
        assert_eq!(make_valid_node_name(":: --"), "");
        assert!(is_node_name_valid("Block_2"));
        assert!(!is_node_name_valid("Side Sets"));
        assert!(!is_node_name_valid(""));
    }

    #[test]
    fn find_node_owning_index_prefers_deepest() {
        let (mut graph, a, _, a1, _) = sample();
        graph.add_dataset_index(a, 4).expect("add");
        graph.add_dataset_index(a1, 4).expect("add");
        assert_eq!(graph.find_node_owning_index(4), Some(a1));
        assert_eq!(graph.find_node_owning_index(5), None);
    }

    #[test]
    fn serializable_graph_roundtrip() {
        let (mut graph, a, _, a1, _) = sample();
        graph.set_attribute(a, "label", "Blocks").expect("attr");
        graph.add_dataset_index(a1, 7).expect("add");

        let serializable = SerializableGraph::from(&graph);
        let restored = AssemblyGraph::try_from(serializable).expect("restore");
        assert_eq!(restored, graph);
    }

    #[test]
    fn from_parts_rejects_dangling_children() {
        let (graph, a, _, _, _) = sample();
        let mut sg = SerializableGraph::from(&graph);
        sg.nodes.retain(|n| n.id != a);
        assert!(AssemblyGraph::try_from(sg).is_err());
    }

    fn raw(id: u64, children: &[u64], parents: &[u64]) -> Node {
        let mut node = Node::new(NodeId(id), format!("N{id}"));
        node.children = children.iter().copied().map(NodeId).collect();
        node.parents = parents.iter().copied().map(NodeId).collect();
        node
    }

    #[test]
    fn from_parts_rejects_duplicate_edges() {
        // Root lists Y twice and Y <-> X loop; must fail, not spin.
        let looped = vec![raw(0, &[1, 1], &[]), raw(1, &[2], &[0, 2]), raw(2, &[1], &[1])];
        assert!(matches!(
            AssemblyGraph::from_parts(looped, 3),
            Err(StrataError::InvalidUsage(_))
        ));

        let acyclic = vec![raw(0, &[1, 1], &[]), raw(1, &[], &[0])];
        assert!(matches!(
            AssemblyGraph::from_parts(acyclic, 2),
            Err(StrataError::InvalidUsage(_))
        ));

        let twice_parented = vec![raw(0, &[1], &[]), raw(1, &[], &[0, 0])];
        assert!(matches!(
            AssemblyGraph::from_parts(twice_parented, 2),
            Err(StrataError::InvalidUsage(_))
        ));
    }

    #[test]
    fn loading_duplicate_children_fails() {
        let (graph, a, _, _, _) = sample();
        let mut sg = SerializableGraph::from(&graph);
        for node in &mut sg.nodes {
            if node.id == NodeId::ROOT {
                node.children.push(a);
            }
        }
        assert!(matches!(
            AssemblyGraph::try_from(sg),
            Err(StrataError::InvalidUsage(_))
        ));
    }

    #[test]
    fn from_parts_names_an_edge_on_the_cycle() {
        // Root -> Y -> X -> Y
        let nodes = vec![raw(0, &[1], &[]), raw(1, &[2], &[0, 2]), raw(2, &[1], &[1])];
        match AssemblyGraph::from_parts(nodes, 3) {
            Err(StrataError::CycleDetected { parent, child }) => {
                assert_eq!((parent, child), (NodeId(2), NodeId(1)));
            }
            other => assert!(
                matches!(other, Err(StrataError::CycleDetected { .. })),
                "{other:?}"
            ),
        }
    }

    #[test]
    fn owner_lookup_survives_shared_diamonds() {
        let mut graph = AssemblyGraph::new();
        let mut top = graph.add_node("Shared", NodeId::ROOT).expect("add");
        for _ in 0..12 {
            let a = graph.add_node("A", top).expect("add");
            let b = graph.add_node("B", top).expect("add");
            let join = graph.add_node("Join", a).expect("add");
            graph.add_edge(b, join).expect("edge");
            top = join;
        }
        let z = graph.add_node("Z", NodeId::ROOT).expect("add");
        graph.add_dataset_index(z, 99).expect("idx");
        assert_eq!(graph.find_node_owning_index(99), Some(z));
    }

    #[test]
    fn owner_lookup_uses_deepest_position_of_shared_node() {
        // Root -> {S, P}, P -> {T, Q}, Q -> S: S sits at depth 1 and 3.
        let mut graph = AssemblyGraph::new();
        let s = graph.add_node("S", NodeId::ROOT).expect("add");
        let p = graph.add_node("P", NodeId::ROOT).expect("add");
        let t = graph.add_node("T", p).expect("add");
        let q = graph.add_node("Q", p).expect("add");
        graph.add_edge(q, s).expect("edge");
        graph.add_dataset_index(t, 5).expect("idx");
        graph.add_dataset_index(s, 5).expect("idx");
        assert_eq!(graph.find_node_owning_index(5), Some(s));
    }

    #[test]
    fn remove_all_dataset_indices_own_or_subtree() {
        let (mut graph, a, b, a1, a2) = sample();
        for (node, index) in [(a, 1), (a1, 2), (a2, 3), (b, 4)] {
            graph.add_dataset_index(node, index).expect("add");
        }

        graph.remove_all_dataset_indices(a, false).expect("own");
        assert!(graph.dataset_indices(a, false).expect("own").is_empty());
        assert_eq!(graph.dataset_indices(a, true).expect("subtree"), vec![2, 3]);

        graph.remove_all_dataset_indices(a, true).expect("subtree");
        assert!(graph.dataset_indices(a, true).expect("subtree").is_empty());
        assert_eq!(
            graph.dataset_indices(NodeId::ROOT, true).expect("all"),
            vec![4]
        );
        assert!(matches!(
            graph.remove_all_dataset_indices(NodeId(99), true),
            Err(StrataError::InvalidNodeReference(_))
        ));
    }

    #[test]
    fn renamed_root_shows_in_paths() {
        let (mut graph, _, _, a1, _) = sample();
        graph.set_root_node_name("Mesh");
        assert_eq!(graph.root_node_name(), "Mesh");
        assert_eq!(graph.node_name(NodeId::ROOT).expect("name"), "Mesh");
        assert_eq!(graph.node_path(a1).expect("path"), "/Mesh/A/A1");
    }

    #[test]
    fn remove_attribute_returns_previous_value() {
        let (mut graph, a, _, _, _) = sample();
        graph.set_attribute(a, "label", "Blocks").expect("attr");

        let removed = graph.remove_attribute(a, "label").expect("remove");
        assert_eq!(removed, Some(AttributeValue::String("Blocks".to_string())));
        assert_eq!(graph.remove_attribute(a, "label").expect("remove"), None);
        assert!(graph.attribute(a, "label").is_none());
        assert_eq!(
            graph.attribute_or_default(a, "label", "none".to_string()),
            "none"
        );
        assert!(graph.remove_attribute(NodeId(99), "label").is_err());
    }
}
