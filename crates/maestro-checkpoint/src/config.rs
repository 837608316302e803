//! Checkpoint configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::CheckpointError;

const MIB: u64 = 1024 * 1024;

/// Checkpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl CheckpointConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        self.store.validate()?;
        self.manager.validate()
    }
}

/// Storage limits and layout for [`FileCheckpointStore`](crate::FileCheckpointStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding checkpoint files and `index.json`.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// gzip checkpoint payloads.
    #[serde(default = "default_true")]
    pub compression: bool,

    /// Maintain `index.json` for listing without loading payloads.
    #[serde(default = "default_true")]
    pub index_enabled: bool,

    /// Upper bound on the serialized (uncompressed) checkpoint and on the
    /// stored file size.
    #[serde(default = "default_max_checkpoint_size")]
    pub max_checkpoint_size: u64,

    /// Upper bound on decompressed bytes when reading.
    #[serde(default = "default_max_decompressed_size")]
    pub max_decompressed_size: u64,

    /// Maximum decompressed/compressed ratio accepted when reading.
    #[serde(default = "default_max_compression_ratio")]
    pub max_compression_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".maestro").join("checkpoints"))
        .unwrap_or_else(|| PathBuf::from("/tmp/maestro/checkpoints"))
}

fn default_max_checkpoint_size() -> u64 {
    50 * MIB
}

fn default_max_decompressed_size() -> u64 {
    100 * MIB
}

fn default_max_compression_ratio() -> f64 {
    100.0
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            compression: default_true(),
            index_enabled: default_true(),
            max_checkpoint_size: default_max_checkpoint_size(),
            max_decompressed_size: default_max_decompressed_size(),
            max_compression_ratio: default_max_compression_ratio(),
        }
    }
}

impl StoreConfig {
    /// Store rooted at `base_path` with default limits.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.base_path.as_os_str().is_empty() {
            return Err(CheckpointError::InvalidConfig(
                "base_path cannot be empty".to_string(),
            ));
        }
        if self.max_checkpoint_size == 0 {
            return Err(CheckpointError::InvalidConfig(
                "max_checkpoint_size must be greater than 0".to_string(),
            ));
        }
        if self.max_decompressed_size == 0 {
            return Err(CheckpointError::InvalidConfig(
                "max_decompressed_size must be greater than 0".to_string(),
            ));
        }
        if self.max_decompressed_size < self.max_checkpoint_size {
            return Err(CheckpointError::InvalidConfig(format!(
                "max_decompressed_size ({}) must not be smaller than max_checkpoint_size ({})",
                self.max_decompressed_size, self.max_checkpoint_size
            )));
        }
        if !self.max_compression_ratio.is_finite() || self.max_compression_ratio < 1.0 {
            return Err(CheckpointError::InvalidConfig(format!(
                "max_compression_ratio must be a finite value >= 1, got {}",
                self.max_compression_ratio
            )));
        }
        Ok(())
    }
}

/// When to checkpoint, resumability rules and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Whether checkpointing is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts after which a failed agent blocks resumption.
    #[serde(default = "default_max_agent_attempts")]
    pub max_agent_attempts: u32,

    /// Per-agent overrides of `max_agent_attempts`.
    #[serde(default)]
    pub agent_attempt_limits: HashMap<String, u32>,

    /// Workflow states that block resumption unless a rollback target is declared.
    #[serde(default = "default_terminal_states")]
    pub terminal_states: Vec<String>,

    /// State of a cleanly finished workflow.
    #[serde(default = "default_complete_state")]
    pub complete_state: String,

    /// Minimum seconds between periodic checkpoints.
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,

    /// Checkpoints older than this are removed by retention.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum number of active checkpoints to keep.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: u32,
}

fn default_max_agent_attempts() -> u32 {
    3
}

fn default_terminal_states() -> Vec<String> {
    vec!["ERROR".to_string(), "ABORTED".to_string()]
}

fn default_complete_state() -> String {
    "COMPLETE".to_string()
}

fn default_periodic_interval() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_checkpoints() -> u32 {
    100
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_agent_attempts: default_max_agent_attempts(),
            agent_attempt_limits: HashMap::new(),
            terminal_states: default_terminal_states(),
            complete_state: default_complete_state(),
            periodic_interval_secs: default_periodic_interval(),
            retention_days: default_retention_days(),
            max_checkpoints: default_max_checkpoints(),
        }
    }
}

impl ManagerConfig {
    /// Attempt budget for one agent.
    pub fn attempt_limit(&self, agent_id: &str) -> u32 {
        self.agent_attempt_limits
            .get(agent_id)
            .copied()
            .unwrap_or(self.max_agent_attempts)
    }

    pub fn is_terminal_state(&self, state: &str) -> bool {
        self.terminal_states.iter().any(|s| s == state)
    }

    pub fn validate(&self) -> Result<(), CheckpointError> {
        if self.max_agent_attempts == 0 {
            return Err(CheckpointError::InvalidConfig(
                "max_agent_attempts must be greater than 0".to_string(),
            ));
        }
        if let Some((agent, _)) = self.agent_attempt_limits.iter().find(|(_, v)| **v == 0) {
            return Err(CheckpointError::InvalidConfig(format!(
                "attempt limit for agent '{}' must be greater than 0",
                agent
            )));
        }
        if self.complete_state.is_empty() {
            return Err(CheckpointError::InvalidConfig(
                "complete_state cannot be empty".to_string(),
            ));
        }
        if self.max_checkpoints == 0 {
            return Err(CheckpointError::InvalidConfig(
                "max_checkpoints must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Recovery behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Auto-recovery on startup.
    #[serde(default = "default_true")]
    pub auto_recover: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recover: default_true(),
        }
    }
}
