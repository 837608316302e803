//! Checkpoint storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointIndexEntry, CheckpointStats, CheckpointStatus};
use crate::error::CheckpointError;
use crate::paths::{checkpoint_file_name, validate_checkpoint_id};

/// Checkpoint storage trait.
///
/// Ids arrive as strings because they cross the API boundary; every
/// implementation validates them against the UUID-v4 allow-list.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, setting `metadata.checkpoint_size` to the
    /// persisted byte length.
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError>;

    /// Get a checkpoint by ID. `Ok(None)` when it does not exist.
    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// All readable checkpoints, oldest first.
    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError>;

    /// Index projections of all checkpoints, oldest first.
    async fn list_entries(&self) -> Result<Vec<CheckpointIndexEntry>, CheckpointError>;

    /// Delete a checkpoint. `Ok(false)` when it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, CheckpointError>;

    /// Mark a checkpoint archived by re-saving it in full.
    async fn archive(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoint = self
            .get(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        checkpoint.status = CheckpointStatus::Archived;
        self.save(&mut checkpoint).await?;
        debug!("Archived checkpoint '{}'", id);
        Ok(checkpoint)
    }

    /// Delete every checkpoint created before `cutoff`. Returns the count deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CheckpointError> {
        let mut deleted = 0;
        for checkpoint in self.list().await? {
            if checkpoint.created_at < cutoff && self.delete(&checkpoint.id.to_string()).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            debug!("Deleted {} checkpoints older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Count, total persisted size and age range.
    async fn get_stats(&self) -> Result<CheckpointStats, CheckpointError> {
        let checkpoints = self.list().await?;
        Ok(CheckpointStats {
            count: checkpoints.len(),
            total_size: checkpoints.iter().map(|c| c.metadata.checkpoint_size).sum(),
            oldest_checkpoint: checkpoints.iter().map(|c| c.created_at).min(),
            newest_checkpoint: checkpoints.iter().map(|c| c.created_at).max(),
        })
    }
}

pub(crate) fn parse_id(id: &str) -> Result<Uuid, CheckpointError> {
    validate_checkpoint_id(id)?;
    Uuid::parse_str(id).map_err(|e| CheckpointError::path(id, e.to_string()))
}

/// In-memory checkpoint store for testing and embedding.
///
/// Sizes are the uncompressed JSON length.
pub struct MemoryCheckpointStore {
    checkpoints: tokio::sync::RwLock<HashMap<Uuid, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self {
            checkpoints: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), CheckpointError> {
        validate_checkpoint_id(&checkpoint.id.to_string())?;
        let bytes = serde_json::to_vec(checkpoint).map_err(|e| {
            CheckpointError::Serialization(format!("Failed to serialize checkpoint: {}", e))
        })?;
        checkpoint.metadata.checkpoint_size = bytes.len() as u64;

        let mut store = self.checkpoints.write().await;
        store.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let id = parse_id(id)?;
        let store = self.checkpoints.read().await;
        Ok(store.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let store = self.checkpoints.read().await;
        let mut checkpoints: Vec<_> = store.values().cloned().collect();
        checkpoints.sort_by_key(|cp| cp.created_at);
        Ok(checkpoints)
    }

    async fn list_entries(&self) -> Result<Vec<CheckpointIndexEntry>, CheckpointError> {
        let store = self.checkpoints.read().await;
        let mut entries: Vec<_> = store
            .values()
            .map(|cp| cp.index_entry(checkpoint_file_name(&cp.id.to_string(), false)))
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn delete(&self, id: &str) -> Result<bool, CheckpointError> {
        let id = parse_id(id)?;
        let mut store = self.checkpoints.write().await;
        Ok(store.remove(&id).is_some())
    }
}
