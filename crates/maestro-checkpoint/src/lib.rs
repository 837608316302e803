//! # Maestro Checkpoint
//!
//! Durable checkpoints and crash recovery for the multi-agent workflow engine.
//!
//! ## Features
//!
//! - UUID-named checkpoint files with owner-only permissions
//! - Optional gzip compression with size and compression-ratio limits
//! - Advisory index that can always be rebuilt from the directory
//! - Resumability verdicts computed at checkpoint time
//! - Recovery into pluggable state graph, agent and context collaborators

pub mod checkpoint;
mod compression;
pub mod config;
pub mod error;
pub mod file_store;
pub mod manager;
mod paths;
pub mod recovery;
pub mod restore;
pub mod store;

#[cfg(test)]
mod test_support;

pub use checkpoint::{
    AgentSnapshot, AgentStatus, Checkpoint, CheckpointIndexEntry, CheckpointMetadata,
    CheckpointStats, CheckpointStatus, CheckpointTrigger, ContextSnapshot, Decision,
    RecoveryInfo, StateHistoryEntry, TokenUsage, WorkflowSnapshot,
};
pub use config::{CheckpointConfig, ManagerConfig, RecoveryConfig, StoreConfig};
pub use error::CheckpointError;
pub use file_store::FileCheckpointStore;
pub use manager::{CheckpointManager, EngineSnapshot};
pub use paths::validate_checkpoint_id;
pub use recovery::{RecoveryManager, RecoveryOptions, RecoveryPoint, RecoveryResult, RecoveryStatus};
pub use restore::{
    AgentRestoreState, ContextRestoreState, RestorableAgent, RestorableAgentRegistry,
    RestorableContextManager, RestorableStateGraph,
};
pub use store::{CheckpointStore, MemoryCheckpointStore};
