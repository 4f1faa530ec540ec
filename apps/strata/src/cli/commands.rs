//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use serde::Serialize;
use std::path::{Path, PathBuf};
use strata_core::{
    AssemblyGraph, AssemblyVisitor, BuildOptions, CompositeDataset, CompositeRoundTrip,
    HierarchyBuilder, NodeId, SelectorEngine, SerializableGraph, StrataError, TraversalOrder,
    canonical_checksum, canonical_crypto_hash, export::CANONICAL_MAGIC, export_canonical,
    graph_from_bytes, graph_to_bytes, import_canonical, primitives::MAGIC_BYTES,
};
use tracing::{debug, info};

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), StrataError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| StrataError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(StrataError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, StrataError> {
    let canonical = path.canonicalize().map_err(|e| {
        StrataError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(StrataError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, StrataError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        StrataError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(StrataError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| StrataError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, StrataError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| StrataError::IoError(format!("Read file: {}", e)))
}

fn write_output(path: &Path, data: &[u8]) -> Result<PathBuf, StrataError> {
    let validated = validate_output_path(path)?;
    std::fs::write(&validated, data)
        .map_err(|e| StrataError::IoError(format!("Write file: {}", e)))?;
    Ok(validated)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), StrataError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| StrataError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// LOADING
// =============================================================================

/// Read a composite layout from JSON.
pub fn load_layout(path: &Path, max_size: u64) -> Result<CompositeDataset, StrataError> {
    let data = read_input(path, max_size)?;
    serde_json::from_slice(&data)
        .map_err(|e| StrataError::DeserializationError(format!("Layout: {}", e)))
}

/// Read a hierarchy in any format the CLI writes.
///
/// The binary and canonical formats are recognized by their magic bytes;
/// anything else is parsed as JSON.
pub fn load_graph(path: &Path, max_size: u64) -> Result<AssemblyGraph, StrataError> {
    let data = read_input(path, max_size)?;
    if data.starts_with(MAGIC_BYTES) {
        return graph_from_bytes(&data);
    }
    if data.get(4..8) == Some(CANONICAL_MAGIC.as_slice()) {
        return import_canonical(&data);
    }
    let serializable: SerializableGraph = serde_json::from_slice(&data).map_err(|e| {
        StrataError::DeserializationError(format!("Could not parse graph file: {}", e))
    })?;
    AssemblyGraph::try_from(serializable)
}

// =============================================================================
// BUILD COMMAND
// =============================================================================

/// Build a hierarchy from a layout file.
pub fn cmd_build(
    input: &Path,
    output: Option<&Path>,
    collection: Option<&Path>,
    json_mode: bool,
    max_size: u64,
) -> Result<(), StrataError> {
    let layout = load_layout(input, max_size)?;
    let built = HierarchyBuilder::build(&layout, &BuildOptions::default())?;

    let graph_path = match output {
        Some(path) => Some(write_output(path, &graph_to_bytes(&built.hierarchy)?)?),
        None => None,
    };
    let collection_path = match collection {
        Some(path) => {
            let data = serde_json::to_vec_pretty(&built.collection)
                .map_err(|e| StrataError::SerializationError(e.to_string()))?;
            Some(write_output(path, &data)?)
        }
        None => None,
    };
    info!(
        source = layout.type_name(),
        nodes = built.hierarchy.node_count(),
        slots = built.collection.number_of_partitioned_datasets(),
        "hierarchy built"
    );

    if json_mode {
        return print_json(&serde_json::json!({
            "source": layout.type_name(),
            "node_count": built.hierarchy.node_count(),
            "slot_count": built.collection.number_of_partitioned_datasets(),
            "partition_count": built.collection.number_of_partitions(),
            "graph": graph_path,
            "collection": collection_path,
        }));
    }

    println!("Source:     {}", layout.type_name());
    println!("Nodes:      {}", built.hierarchy.node_count());
    println!("Slots:      {}", built.collection.number_of_partitioned_datasets());
    println!("Partitions: {}", built.collection.number_of_partitions());
    if let Some(path) = graph_path {
        println!("Hierarchy written to {:?}", path);
    }
    if let Some(path) = collection_path {
        println!("Collection written to {:?}", path);
    }
    if output.is_none() {
        println!();
        for line in tree_lines(&built.hierarchy)? {
            println!("{}", line.render());
        }
    }
    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

#[derive(Debug, Serialize)]
struct TreeLine {
    depth: usize,
    id: u64,
    name: String,
    path: String,
    indices: Vec<u64>,
}

impl TreeLine {
    fn render(&self) -> String {
        let indent = "  ".repeat(self.depth);
        if self.indices.is_empty() {
            format!("{}{}", indent, self.name)
        } else {
            format!("{}{} {:?}", indent, self.name, self.indices)
        }
    }
}

#[derive(Default)]
struct TreePrinter {
    depth: usize,
    lines: Vec<TreeLine>,
    failure: Option<StrataError>,
}

impl AssemblyVisitor for TreePrinter {
    fn visit(&mut self, graph: &AssemblyGraph, node: NodeId) {
        let line = graph.node(node).and_then(|n| {
            Ok(TreeLine {
                depth: self.depth,
                id: node.0,
                name: n.name.clone(),
                path: graph.node_path(node)?,
                indices: n.dataset_indices.clone(),
            })
        });
        match line {
            Ok(line) => self.lines.push(line),
            Err(e) => {
                self.failure.get_or_insert(e);
            }
        }
    }

    fn begin_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {
        self.depth = self.depth.saturating_add(1);
    }

    fn end_sub_tree(&mut self, _graph: &AssemblyGraph, _node: NodeId) {
        self.depth = self.depth.saturating_sub(1);
    }
}

fn tree_lines(graph: &AssemblyGraph) -> Result<Vec<TreeLine>, StrataError> {
    let mut printer = TreePrinter::default();
    graph.visit(NodeId::ROOT, &mut printer, TraversalOrder::DepthFirst)?;
    match printer.failure {
        Some(e) => Err(e),
        None => Ok(printer.lines),
    }
}

/// Print a hierarchy as an indented tree.
pub fn cmd_tree(graph_path: &Path, json_mode: bool, max_size: u64) -> Result<(), StrataError> {
    let graph = load_graph(graph_path, max_size)?;
    let lines = tree_lines(&graph)?;

    if json_mode {
        return print_json(&lines);
    }
    for line in &lines {
        println!("{}", line.render());
    }
    Ok(())
}

// =============================================================================
// SELECT COMMAND
// =============================================================================

/// Resolve selectors to node paths or composite ids.
pub fn cmd_select(
    graph_path: &Path,
    selectors: &[String],
    leaf_nodes_only: bool,
    ids: bool,
    json_mode: bool,
    max_size: u64,
) -> Result<(), StrataError> {
    let graph = load_graph(graph_path, max_size)?;
    let selection = SelectorEngine::select_nodes(&graph, selectors);
    debug!(matches = selection.nodes.len(), "selection resolved");

    if ids {
        if !SelectorEngine::is_hierarchy(&graph) {
            return Err(StrataError::InvalidUsage(
                "--ids needs a hierarchy built by `strata build`".to_string(),
            ));
        }
        let cids =
            SelectorEngine::selected_composite_ids(selectors, &graph, None, leaf_nodes_only)?;
        if json_mode {
            return print_json(&serde_json::json!({
                "composite_ids": cids,
                "warnings": selection.warnings,
            }));
        }
        for cid in cids {
            println!("{}", cid);
        }
        return Ok(());
    }

    let mut paths = Vec::with_capacity(selection.nodes.len());
    for node in &selection.nodes {
        if leaf_nodes_only && !graph.node(*node)?.is_leaf() {
            continue;
        }
        paths.push(graph.node_path(*node)?);
    }
    if json_mode {
        return print_json(&serde_json::json!({
            "paths": paths,
            "warnings": selection.warnings,
        }));
    }
    for path in paths {
        println!("{}", path);
    }
    Ok(())
}

// =============================================================================
// SELECTOR-FOR COMMAND
// =============================================================================

/// Print a selector naming composite id `cid`.
pub fn cmd_selector_for(
    graph_path: &Path,
    cid: u64,
    json_mode: bool,
    max_size: u64,
) -> Result<(), StrataError> {
    let graph = load_graph(graph_path, max_size)?;
    let selector = SelectorEngine::selector_for_composite_id(cid, &graph);

    if json_mode {
        return print_json(&serde_json::json!({ "cid": cid, "selector": selector }));
    }
    match selector {
        Some(selector) => {
            println!("{}", selector);
            Ok(())
        }
        None => Err(StrataError::InvalidUsage(format!(
            "No node encloses composite id {}",
            cid
        ))),
    }
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export a hierarchy.
pub fn cmd_export(
    graph_path: &Path,
    output: &Path,
    format: &str,
    max_size: u64,
) -> Result<(), StrataError> {
    let graph = load_graph(graph_path, max_size)?;

    let data = match format {
        "canonical" => {
            let data = export_canonical(&graph)?;
            println!("Checksum: {}", canonical_checksum(&graph));
            data
        }
        "json" => serde_json::to_vec_pretty(&SerializableGraph::from(&graph))
            .map_err(|e| StrataError::SerializationError(e.to_string()))?,
        _ => {
            return Err(StrataError::InvalidUsage(format!(
                "Unknown format: {}. Use: canonical, json",
                format
            )));
        }
    };

    let written = write_output(output, &data)?;
    println!("Exported {} bytes to {:?}", data.len(), written);
    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import a canonical or JSON export.
pub fn cmd_import(input: &Path, output: &Path, max_size: u64) -> Result<(), StrataError> {
    let graph = load_graph(input, max_size)?;
    let written = write_output(output, &graph_to_bytes(&graph)?)?;
    println!(
        "Imported graph: {} nodes to {:?}",
        graph.node_count(),
        written
    );
    Ok(())
}

// =============================================================================
// ROUNDTRIP COMMAND
// =============================================================================

/// Build a layout, reconstruct it and compare against the source.
///
/// A changed block structure is an error; lost AMR geometry is not.
pub fn cmd_roundtrip(input: &Path, json_mode: bool, max_size: u64) -> Result<(), StrataError> {
    let layout = load_layout(input, max_size)?;
    let built = HierarchyBuilder::build(&layout, &BuildOptions::default())?;
    let back = CompositeRoundTrip::from_hierarchy(&built.collection, &built.hierarchy)?;

    let exact = back == layout;
    let before = layout.summary();
    let after = back.summary();
    let structure_kept = before == after;

    if json_mode {
        print_json(&serde_json::json!({
            "source": layout.type_name(),
            "exact": exact,
            "structure_kept": structure_kept,
            "before": before,
            "after": after,
        }))?;
    } else {
        println!("Source:    {}", layout.type_name());
        println!("Leaves:    {} -> {}", before.leaf_count, after.leaf_count);
        println!("Depth:     {} -> {}", before.depth, after.depth);
        println!("Exact:     {}", exact);
    }

    if !structure_kept {
        return Err(StrataError::InvalidUsage(
            "round trip changed the block structure".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Compute BLAKE3 hash of the canonical export.
pub fn cmd_hash(graph_path: &Path, json_mode: bool, max_size: u64) -> Result<(), StrataError> {
    let graph = load_graph(graph_path, max_size)?;
    let hash = canonical_crypto_hash(&graph)?;
    let checksum = canonical_checksum(&graph);

    if json_mode {
        return print_json(&serde_json::json!({
            "hash": hash,
            "algorithm": "blake3",
            "checksum": checksum,
            "node_count": graph.node_count(),
        }));
    }

    println!("BLAKE3:   {}", hash);
    println!("Checksum: {}", checksum);
    println!("Nodes:    {}", graph.node_count());
    Ok(())
}
