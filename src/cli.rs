//! CLI definitions for Maestro.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Maestro CLI.
#[derive(Parser)]
#[command(name = "maestro")]
#[command(about = "Inspect, maintain and recover workflow checkpoints")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.maestro/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the checkpoint directory from the configuration
    #[arg(long, global = true, env = "MAESTRO_CHECKPOINT_DIR")]
    pub base_path: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(long, default_value = "table", global = true)]
    pub format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Checkpoint store commands
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Recovery inspection commands
    Recovery {
        #[command(subcommand)]
        action: RecoveryAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum CheckpointAction {
    /// List checkpoints, newest first
    List {
        /// Include archived checkpoints
        #[arg(long)]
        all: bool,
    },

    /// Show a checkpoint in full
    Show {
        /// Checkpoint ID
        id: String,
    },

    /// Show store statistics
    Stats,

    /// Run semantic validation on a checkpoint
    Validate {
        /// Checkpoint ID
        id: String,
    },

    /// Mark a checkpoint as archived
    Archive {
        /// Checkpoint ID
        id: String,
    },

    /// Delete a checkpoint
    Delete {
        /// Checkpoint ID
        id: String,
    },

    /// Apply the retention policy (age horizon, then count cap)
    Prune,

    /// Rebuild the index from the checkpoint directory
    Reindex,
}

#[derive(Subcommand)]
pub(crate) enum RecoveryAction {
    /// List recovery points, newest first
    Points,

    /// Diagnose whether a checkpoint can be recovered
    Status {
        /// Checkpoint ID
        id: String,
    },

    /// Dry-run a recovery and report what would happen
    Plan {
        /// Checkpoint ID (default: latest active checkpoint)
        id: Option<String>,

        /// Leave agents recorded as failed untouched
        #[arg(long)]
        skip_failed_agent: bool,

        /// Restore into this state instead of the recorded one
        #[arg(long)]
        reset_to_state: Option<String>,

        /// Enter single-step replay mode after restoring
        #[arg(long)]
        replay_mode: bool,
    },
}
