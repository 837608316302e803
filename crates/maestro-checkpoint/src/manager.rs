//! Checkpoint creation, semantic validation and retention.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checkpoint::{
    AgentSnapshot, AgentStatus, Checkpoint, CheckpointIndexEntry, CheckpointStats,
    CheckpointStatus, CheckpointTrigger, ContextSnapshot, RecoveryInfo, WorkflowSnapshot,
};
use crate::config::ManagerConfig;
use crate::error::CheckpointError;
use crate::store::CheckpointStore;

/// Live engine state handed over by the workflow engine.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub workflow: WorkflowSnapshot,
    pub agents: Vec<AgentSnapshot>,
    pub context: ContextSnapshot,
}

/// Decides when to checkpoint and whether a checkpoint is safe to resume from.
pub struct CheckpointManager {
    config: ManagerConfig,
    store: Arc<dyn CheckpointStore>,
    last_checkpoint_at: Mutex<Option<DateTime<Utc>>>,
}

impl CheckpointManager {
    /// Create a new checkpoint manager.
    pub fn new(config: ManagerConfig, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            config,
            store,
            last_checkpoint_at: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Whether an event with this trigger is worth a checkpoint.
    ///
    /// Periodic triggers are debounced against the last checkpoint taken by
    /// this manager; every other trigger qualifies while enabled.
    pub fn should_checkpoint(&self, trigger: CheckpointTrigger) -> bool {
        if !self.config.enabled {
            return false;
        }
        match trigger {
            CheckpointTrigger::Periodic => {
                let last = *self.last_checkpoint_at.lock();
                let Some(last) = last else {
                    return true;
                };
                // An interval too large for a TimeDelta never elapses.
                i64::try_from(self.config.periodic_interval_secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .is_some_and(|interval| Utc::now() - last >= interval)
            }
            _ => true,
        }
    }

    /// Compute the resumability verdict for a workflow and its agents.
    pub fn assess(&self, workflow: &WorkflowSnapshot, agents: &[AgentSnapshot]) -> RecoveryInfo {
        let mut blockers = Vec::new();

        for agent in agents {
            if self.retries_exhausted(agent) {
                blockers.push(format!(
                    "{} exceeded retry limit ({}/{} attempts)",
                    agent.agent_id,
                    agent.attempts,
                    self.config.attempt_limit(&agent.agent_id)
                ));
            }
        }

        if self.config.is_terminal_state(&workflow.current_state) && workflow.rollback_target.is_none() {
            blockers.push(format!(
                "workflow is in terminal state {} with no rollback target",
                workflow.current_state
            ));
        }

        if blockers.is_empty() {
            RecoveryInfo::resumable()
        } else {
            RecoveryInfo::blocked(blockers)
        }
    }

    fn retries_exhausted(&self, agent: &AgentSnapshot) -> bool {
        let limit = self.config.attempt_limit(&agent.agent_id);
        match agent.status {
            AgentStatus::Completed | AgentStatus::Skipped => false,
            AgentStatus::Failed => agent.attempts >= limit,
            AgentStatus::Pending | AgentStatus::Running => agent.attempts > limit,
        }
    }

    /// Build, validate and persist a checkpoint of `snapshot`.
    pub async fn create_checkpoint(
        &self,
        trigger: CheckpointTrigger,
        snapshot: EngineSnapshot,
    ) -> Result<Checkpoint, CheckpointError> {
        let recovery = self.assess(&snapshot.workflow, &snapshot.agents);
        let mut checkpoint = Checkpoint::new(
            trigger,
            snapshot.workflow,
            snapshot.agents,
            snapshot.context,
            recovery,
        );

        self.validate(&checkpoint)?;
        self.store.save(&mut checkpoint).await?;
        *self.last_checkpoint_at.lock() = Some(checkpoint.created_at);

        if checkpoint.recovery.can_resume {
            info!(
                "Created checkpoint {} ({}) at state {}",
                checkpoint.id, trigger, checkpoint.workflow.current_state
            );
        } else {
            warn!(
                "Created non-resumable checkpoint {} ({}) at state {}: {}",
                checkpoint.id,
                trigger,
                checkpoint.workflow.current_state,
                checkpoint.recovery.blockers.join("; ")
            );
        }
        Ok(checkpoint)
    }

    /// Semantic validation, independent of the store's structural checks.
    pub fn validate(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let id = checkpoint.id.to_string();
        let fail = |reason: String| Err(CheckpointError::integrity(id.clone(), reason));

        let history = &checkpoint.workflow.state_history;
        let Some(last) = history.last() else {
            return fail("state history is empty".to_string());
        };

        for (i, pair) in history.windows(2).enumerate() {
            if pair[1].entered_at < pair[0].entered_at {
                return fail(format!(
                    "state history out of order at entry {} ({} entered before {})",
                    i + 1,
                    pair[1].state,
                    pair[0].state
                ));
            }
        }

        if let Some(entry) = history
            .iter()
            .find(|e| e.exited_at.is_some_and(|exited| exited < e.entered_at))
        {
            return fail(format!("state {} exited before it was entered", entry.state));
        }

        if last.state != checkpoint.workflow.current_state {
            return fail(format!(
                "current state {} does not match last history entry {}",
                checkpoint.workflow.current_state, last.state
            ));
        }

        if checkpoint.agents.is_empty() {
            return fail("agent list is empty".to_string());
        }

        let mut seen = HashSet::new();
        if let Some(dup) = checkpoint
            .agents
            .iter()
            .find(|a| !seen.insert(a.agent_id.as_str()))
        {
            return fail(format!("duplicate agent id {}", dup.agent_id));
        }

        let recovery = &checkpoint.recovery;
        if recovery.can_resume {
            if !recovery.blockers.is_empty() {
                return fail(format!(
                    "marked resumable but lists blockers: {}",
                    recovery.blockers.join("; ")
                ));
            }
            let actual = self.assess(&checkpoint.workflow, &checkpoint.agents);
            if !actual.can_resume {
                return fail(format!(
                    "marked resumable but: {}",
                    actual.blockers.join("; ")
                ));
            }
        } else if recovery.blockers.is_empty() {
            return fail("marked non-resumable without naming a blocker".to_string());
        }

        Ok(())
    }

    /// Load and semantically validate a checkpoint.
    pub async fn validate_checkpoint(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        self.validate(&checkpoint)?;
        Ok(checkpoint)
    }

    pub async fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.store.get(id).await
    }

    /// The newest active checkpoint, if any.
    pub async fn get_latest_checkpoint(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let mut entries = self.store.list_entries().await?;
        entries.retain(|e| e.status == CheckpointStatus::Active);
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for entry in entries {
            match self.store.get(&entry.id.to_string()).await {
                Ok(Some(checkpoint)) if checkpoint.is_active() => return Ok(Some(checkpoint)),
                Ok(_) => continue,
                Err(e) if e.is_skippable_entry() => {
                    warn!("Skipping unreadable checkpoint {}: {}", entry.id, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        self.store.list().await
    }

    /// Index projections, without loading payloads where the store allows it.
    pub async fn list_entries(&self) -> Result<Vec<CheckpointIndexEntry>, CheckpointError> {
        self.store.list_entries().await
    }

    pub async fn archive_checkpoint(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        self.store.archive(id).await
    }

    pub async fn delete_checkpoint(&self, id: &str) -> Result<bool, CheckpointError> {
        self.store.delete(id).await
    }

    pub async fn stats(&self) -> Result<CheckpointStats, CheckpointError> {
        self.store.get_stats().await
    }

    /// Remove checkpoints past the retention horizon, then cap the number of
    /// active checkpoints, oldest first. Returns the number deleted.
    pub async fn apply_retention(&self) -> Result<usize, CheckpointError> {
        // A horizon reaching past the representable range has no cutoff.
        let cutoff = Duration::try_days(i64::from(self.config.retention_days))
            .and_then(|horizon| Utc::now().checked_sub_signed(horizon));
        let mut deleted = match cutoff {
            Some(cutoff) => self.store.delete_older_than(cutoff).await?,
            None => 0,
        };

        let mut active: Vec<_> = self
            .store
            .list_entries()
            .await?
            .into_iter()
            .filter(|e| e.status == CheckpointStatus::Active)
            .collect();
        let max = self.config.max_checkpoints as usize;

        if active.len() > max {
            active.sort_by_key(|e| e.created_at);
            let excess = active.len() - max;
            for entry in active.iter().take(excess) {
                if self.store.delete(&entry.id.to_string()).await? {
                    deleted += 1;
                }
            }
        }

        if deleted > 0 {
            info!("Retention removed {} checkpoints", deleted);
        } else {
            debug!("Retention found nothing to remove");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
