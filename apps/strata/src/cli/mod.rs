//! # Strata CLI Module
//!
//! This module implements the CLI interface for Strata.
//!
//! ## Available Commands
//!
//! - `build` - Build a hierarchy from a JSON composite layout
//! - `tree` - Print a hierarchy as an indented tree
//! - `select` - Resolve selectors to nodes or composite ids
//! - `selector-for` - Find a selector naming a composite id
//! - `export` - Export a hierarchy (canonical, json)
//! - `import` - Import a canonical or JSON export
//! - `roundtrip` - Build, reconstruct and compare a layout
//! - `hash` - Compute the BLAKE3 hash of a canonical export

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::StrataError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Strata - block hierarchies for composite datasets
///
/// Builds a named, selectable hierarchy over the blocks of a multi-block,
/// partitioned, multi-piece or AMR layout.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Path to a strata.toml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a hierarchy from a JSON composite layout
    Build {
        /// Layout file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the hierarchy
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where to write the flat partition collection (JSON)
        #[arg(long)]
        collection: Option<PathBuf>,
    },

    /// Print a hierarchy as an indented tree
    Tree {
        /// Hierarchy file
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Resolve selectors against a hierarchy
    Select {
        /// Hierarchy file
        #[arg(short, long)]
        graph: PathBuf,

        /// Selector, e.g. "//Block0" or "/Root/*[@label='Walls']"
        #[arg(short, long = "selector", required = true)]
        selectors: Vec<String>,

        /// Only collect ids owned by leaf nodes
        #[arg(long)]
        leaves: bool,

        /// Print composite ids instead of node paths
        #[arg(long)]
        ids: bool,
    },

    /// Find a selector that names a composite id
    SelectorFor {
        /// Hierarchy file
        #[arg(short, long)]
        graph: PathBuf,

        /// Composite id
        #[arg(long)]
        cid: u64,
    },

    /// Export a hierarchy
    Export {
        /// Hierarchy file
        #[arg(short, long)]
        graph: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (canonical, json)
        #[arg(short = 't', long, default_value = "canonical")]
        format: String,
    },

    /// Import a canonical or JSON export as a hierarchy file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Hierarchy file to write
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build a layout, reconstruct it from the hierarchy and compare
    Roundtrip {
        /// Layout file (JSON)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of the canonical export
    Hash {
        /// Hierarchy file
        #[arg(short, long)]
        graph: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments and loaded config.
pub fn execute(cli: Cli, config: &Config) -> Result<(), StrataError> {
    let json_mode = cli.json_mode || config.json_mode;
    let limit = config.max_input_bytes;

    match cli.command {
        Commands::Build {
            input,
            output,
            collection,
        } => cmd_build(
            &input,
            output.as_deref(),
            collection.as_deref(),
            json_mode,
            limit,
        ),
        Commands::Tree { graph } => cmd_tree(&graph, json_mode, limit),
        Commands::Select {
            graph,
            selectors,
            leaves,
            ids,
        } => cmd_select(
            &graph,
            &selectors,
            leaves || config.leaf_nodes_only,
            ids,
            json_mode,
            limit,
        ),
        Commands::SelectorFor { graph, cid } => cmd_selector_for(&graph, cid, json_mode, limit),
        Commands::Export {
            graph,
            output,
            format,
        } => cmd_export(&graph, &output, &format, limit),
        Commands::Import { input, output } => cmd_import(&input, &output, limit),
        Commands::Roundtrip { input } => cmd_roundtrip(&input, json_mode, limit),
        Commands::Hash { graph } => cmd_hash(&graph, json_mode, limit),
    }
}
