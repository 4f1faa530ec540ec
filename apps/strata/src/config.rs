//! # Configuration
//!
//! Optional `strata.toml` defaults for the CLI.
//!
//! Lookup order: `--config PATH`, then `STRATA_CONFIG`, then `./strata.toml`.
//! A missing implicit file means defaults; an explicitly named file must
//! exist. Command-line flags override whatever the file says.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use strata_core::StrataError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STRATA_CONFIG";

/// Environment variable selecting `text` or `json` log output.
pub const LOG_FORMAT_ENV: &str = "STRATA_LOG_FORMAT";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Default cap on layout and graph files read by the CLI (100 MB).
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 100 * 1024 * 1024;

/// Largest config file accepted.
const MAX_CONFIG_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `text` or `json`.
    pub log_format: String,
    pub json_mode: bool,
    /// Default for `select --leaves`.
    pub leaf_nodes_only: bool,
    pub max_input_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            json_mode: false,
            leaf_nodes_only: false,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl Config {
    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, StrataError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| StrataError::DeserializationError(format!("config: {}", e)))?;
        match config.log_format.as_str() {
            "text" | "json" => Ok(config),
            other => Err(StrataError::InvalidUsage(format!(
                "Unknown log_format '{}'. Use: text, json",
                other
            ))),
        }
    }

    /// Resolve and load the config file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, StrataError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::read(&path),
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.is_file() {
                    Self::read(implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self, StrataError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            StrataError::IoError(format!("Config file '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_BYTES {
            return Err(StrataError::InvalidUsage(format!(
                "Config file '{}' is larger than {} bytes",
                path.display(),
                MAX_CONFIG_BYTES
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| StrataError::IoError(format!("Read config: {}", e)))?;
        Self::from_toml(&text)
    }

    /// Effective log format: the environment wins over the file.
    pub fn effective_log_format(&self) -> String {
        std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| self.log_format.clone())
    }
}

// =============================================================================
// TESTS
// =============================================================================
