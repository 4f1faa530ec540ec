//! # Strata
//!
//! The `strata` binary.
//!
//! ## Usage
//!
//! ```bash
//! # Build a hierarchy and its flat collection from a layout
//! strata build -i layout.json -o mesh.strata --collection mesh.json
//!
//! # Query it
//! strata tree -g mesh.strata
//! strata select -g mesh.strata -s "//Element_Blocks/*" --ids
//! strata selector-for -g mesh.strata --cid 7
//! ```
//!
//! Logging goes to stderr. `STRATA_LOG_FORMAT=json` (or `log_format = "json"`
//! in `strata.toml`) switches to machine-parseable output; `RUST_LOG`
//! overrides the default `strata=info` filter.

use clap::Parser;
use strata::cli;
use strata::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // Config errors surface after logging is up, with defaults in the meantime.
    let loaded = Config::load(cli.config.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();

    let default_filter = if cli.verbose {
        "strata=debug,strata_core=debug"
    } else if cli.quiet {
        "strata=error,strata_core=error"
    } else {
        "strata=info,strata_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match config.effective_log_format().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = loaded {
        tracing::error!("Error: {}", e);
        std::process::exit(2);
    }

    if let Err(e) = cli::execute(cli, &config) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
