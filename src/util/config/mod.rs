//! Runtime configuration
//!
//! Read from a TOML file; every field has a default so a partial (or
//! missing) file is fine.
//!
//! ```toml
//! max_call_depth = 200
//! frame_cache_size = 4
//! array_cache_size = 4
//! snapshot_format = "ron"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vm::pool::{DEFAULT_ARRAY_CACHE_SIZE, DEFAULT_FRAME_CACHE_SIZE};

/// Default call stack depth limit
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Encoding used for saved snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Ron,
    Json,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Frames a single thread may hold before a call fails
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Frame pool capacity
    #[serde(default = "default_frame_cache_size")]
    pub frame_cache_size: usize,
    /// Stack array pool capacity
    #[serde(default = "default_array_cache_size")]
    pub array_cache_size: usize,
    #[serde(default)]
    pub snapshot_format: SnapshotFormat,
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

fn default_frame_cache_size() -> usize {
    DEFAULT_FRAME_CACHE_SIZE
}

fn default_array_cache_size() -> usize {
    DEFAULT_ARRAY_CACHE_SIZE
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            frame_cache_size: DEFAULT_FRAME_CACHE_SIZE,
            array_cache_size: DEFAULT_ARRAY_CACHE_SIZE,
            snapshot_format: SnapshotFormat::Ron,
        }
    }
}

/// Load configuration from a TOML file
/// Returns the defaults if the file doesn't exist
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Save configuration as TOML, creating parent directories
pub fn save_config(
    config: &RuntimeConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(ConfigError::IoError)?;
        }
    }

    let content = toml::to_string_pretty(config).map_err(ConfigError::SerializeError)?;
    fs::write(path, content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[source] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[source] toml::de::Error),

    #[error("Config serialize error: {0}")]
    SerializeError(#[source] toml::ser::Error),
}
