//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use maestro_checkpoint::{CheckpointConfig, ManagerConfig, RecoveryConfig, StoreConfig};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rotated log files.
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Write logs to files in addition to the console.
    #[serde(default = "default_file")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: default_log_directory(),
            file: default_file(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".maestro")
        .join("logs")
}

fn default_file() -> bool {
    true
}
