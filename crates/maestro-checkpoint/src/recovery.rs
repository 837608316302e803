//! Recovery from checkpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{AgentStatus, Checkpoint, CheckpointTrigger};
use crate::config::RecoveryConfig;
use crate::error::CheckpointError;
use crate::manager::CheckpointManager;
use crate::restore::{
    AgentRestoreState, ContextRestoreState, RestorableAgentRegistry, RestorableContextManager,
    RestorableStateGraph,
};

const RECOVERY_TRIGGER: &str = "recovery";

/// Options for a single recovery attempt.
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    pub checkpoint_id: String,
    /// Leave agents recorded as failed untouched instead of restoring them.
    pub skip_failed_agent: bool,
    /// Restore the workflow into this state instead of the recorded one.
    pub reset_to_state: Option<String>,
    /// Put the state graph into single-step mode once restored.
    pub replay_mode: bool,
    /// Report what would happen without touching any collaborator.
    pub dry_run: bool,
}

impl RecoveryOptions {
    pub fn new(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
            ..Default::default()
        }
    }

    pub fn skip_failed_agent(mut self) -> Self {
        self.skip_failed_agent = true;
        self
    }

    pub fn reset_to_state(mut self, state: impl Into<String>) -> Self {
        self.reset_to_state = Some(state.into());
        self
    }

    pub fn replay_mode(mut self) -> Self {
        self.replay_mode = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Result of a recovery operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    /// The checkpoint recovered from, when it could be loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_state: Option<String>,
    pub skipped_agents: Vec<String>,
    pub restored_agents: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub recovered_at: DateTime<Utc>,
}

impl RecoveryResult {
    fn failed(checkpoint: Option<Checkpoint>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            checkpoint,
            restored_state: None,
            skipped_agents: Vec::new(),
            restored_agents: Vec::new(),
            warnings: Vec::new(),
            errors,
            recovered_at: Utc::now(),
        }
    }
}

/// Read-only diagnosis of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    pub can_recover: bool,
    pub blockers: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Lightweight projection for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPoint {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub state: String,
    pub can_resume: bool,
}

/// Replays checkpoints into the live engine.
pub struct RecoveryManager {
    checkpoint_manager: Arc<CheckpointManager>,
    config: RecoveryConfig,
    state_graph: Option<Arc<dyn RestorableStateGraph>>,
    agent_registry: Option<Arc<dyn RestorableAgentRegistry>>,
    context_manager: Option<Arc<dyn RestorableContextManager>>,
}

impl RecoveryManager {
    /// Create a recovery manager with no collaborators wired.
    pub fn new(checkpoint_manager: Arc<CheckpointManager>, config: RecoveryConfig) -> Self {
        Self {
            checkpoint_manager,
            config,
            state_graph: None,
            agent_registry: None,
            context_manager: None,
        }
    }

    pub fn with_state_graph(mut self, graph: Arc<dyn RestorableStateGraph>) -> Self {
        self.state_graph = Some(graph);
        self
    }

    pub fn with_agent_registry(mut self, registry: Arc<dyn RestorableAgentRegistry>) -> Self {
        self.agent_registry = Some(registry);
        self
    }

    pub fn with_context_manager(mut self, manager: Arc<dyn RestorableContextManager>) -> Self {
        self.context_manager = Some(manager);
        self
    }

    /// Get the checkpoint manager.
    pub fn checkpoint_manager(&self) -> &Arc<CheckpointManager> {
        &self.checkpoint_manager
    }

    /// Restore engine state from a checkpoint.
    ///
    /// Security and size errors from the store propagate. Everything else is
    /// reported in the returned result.
    pub async fn recover(&self, options: RecoveryOptions) -> Result<RecoveryResult, CheckpointError> {
        let id = options.checkpoint_id.as_str();

        let Some(checkpoint) = self.checkpoint_manager.get_checkpoint(id).await? else {
            warn!("Recovery requested for unknown checkpoint {}", id);
            return Ok(RecoveryResult::failed(None, vec!["not found".to_string()]));
        };

        if let Err(e) = self.checkpoint_manager.validate(&checkpoint) {
            error!("Checkpoint {} failed integrity validation: {}", id, e);
            let mut result = RecoveryResult::failed(
                Some(checkpoint),
                vec!["integrity validation failed".to_string()],
            );
            result.warnings.push(e.to_string());
            return Ok(result);
        }

        let overridden = options.skip_failed_agent || options.reset_to_state.is_some();
        if !checkpoint.recovery.can_resume && !overridden {
            warn!(
                "Refusing to recover from {}: {}",
                id,
                checkpoint.recovery.blockers.join("; ")
            );
            let blockers = checkpoint.recovery.blockers.clone();
            return Ok(RecoveryResult::failed(Some(checkpoint), blockers));
        }

        let target_state = options
            .reset_to_state
            .clone()
            .unwrap_or_else(|| checkpoint.workflow.current_state.clone());

        let mut result = RecoveryResult {
            success: true,
            checkpoint: None,
            restored_state: Some(target_state.clone()),
            skipped_agents: Vec::new(),
            restored_agents: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            recovered_at: Utc::now(),
        };

        if let Some(state) = &options.reset_to_state {
            if !checkpoint.workflow.state_history.iter().any(|e| &e.state == state) {
                result
                    .warnings
                    .push(format!("reset state {} does not appear in the recorded history", state));
            }
        }

        if options.dry_run {
            if options.skip_failed_agent {
                result.skipped_agents = failed_agents(&checkpoint);
            }
            result
                .warnings
                .push(format!("dry run: would restore to state {}; nothing was modified", target_state));
            info!("Dry-run recovery of {} targets state {}", id, target_state);
            result.checkpoint = Some(checkpoint);
            return Ok(result);
        }

        info!("Recovering from checkpoint {} into state {}", id, target_state);

        if let Err(e) = self.restore_workflow(&checkpoint, &target_state, &mut result).await {
            error!("Workflow restoration from {} failed: {}", id, e);
            return Ok(fatal(result, checkpoint, format!("workflow state restoration failed: {}", e)));
        }

        self.restore_agents(&checkpoint, options.skip_failed_agent, &mut result)
            .await;

        match &self.context_manager {
            Some(context_manager) => {
                let context = ContextRestoreState::from(&checkpoint.context);
                if let Err(e) = context_manager.restore(context).await {
                    error!("Context restoration from {} failed: {}", id, e);
                    return Ok(fatal(result, checkpoint, format!("context restoration failed: {}", e)));
                }
            }
            None => result
                .warnings
                .push("no context manager wired; shared context not restored".to_string()),
        }

        if options.replay_mode {
            match &self.state_graph {
                Some(graph) => match graph.set_replay_mode(true).await {
                    Ok(()) => result
                        .warnings
                        .push("replay mode enabled; advance the workflow manually".to_string()),
                    Err(e) => result
                        .warnings
                        .push(format!("failed to enable replay mode: {}", e)),
                },
                None => result
                    .warnings
                    .push("replay mode requested but no state graph is wired".to_string()),
            }
        }

        for warning in &result.warnings {
            warn!("Recovery of {}: {}", id, warning);
        }
        info!(
            "Recovered checkpoint {} ({} agents restored, {} skipped)",
            id,
            result.restored_agents.len(),
            result.skipped_agents.len()
        );

        result.checkpoint = Some(checkpoint);
        Ok(result)
    }

    async fn restore_workflow(
        &self,
        checkpoint: &Checkpoint,
        target_state: &str,
        result: &mut RecoveryResult,
    ) -> Result<(), CheckpointError> {
        let Some(graph) = &self.state_graph else {
            result
                .warnings
                .push("no state graph wired; workflow state not restored".to_string());
            return Ok(());
        };

        graph.reset().await?;
        graph.transition_to(target_state, RECOVERY_TRIGGER).await?;
        for entry in &checkpoint.workflow.state_history {
            graph.record_history(entry).await?;
        }
        debug!(
            "Replayed {} history entries into state graph",
            checkpoint.workflow.state_history.len()
        );
        Ok(())
    }

    async fn restore_agents(
        &self,
        checkpoint: &Checkpoint,
        skip_failed: bool,
        result: &mut RecoveryResult,
    ) {
        let Some(registry) = &self.agent_registry else {
            result
                .warnings
                .push("no agent registry wired; agent states not restored".to_string());
            return;
        };

        for snapshot in &checkpoint.agents {
            let Some(agent) = registry.get_agent(&snapshot.agent_id).await else {
                result
                    .warnings
                    .push(format!("agent {} is not registered; not restored", snapshot.agent_id));
                continue;
            };

            if skip_failed && snapshot.status == AgentStatus::Failed {
                debug!("Skipping failed agent {}", snapshot.agent_id);
                result.skipped_agents.push(snapshot.agent_id.clone());
                continue;
            }

            match agent
                .restore_state(AgentRestoreState::from_snapshot(snapshot))
                .await
            {
                Ok(()) => result.restored_agents.push(snapshot.agent_id.clone()),
                Err(e) => result
                    .warnings
                    .push(format!("failed to restore agent {}: {}", snapshot.agent_id, e)),
            }
        }
    }

    /// Recover from the latest checkpoint at startup.
    ///
    /// `Ok(None)` means there is nothing to do: auto-recovery is off, no
    /// checkpoint exists, or the last run finished cleanly.
    pub async fn attempt_auto_recovery(&self) -> Result<Option<RecoveryResult>, CheckpointError> {
        if !self.config.auto_recover {
            debug!("Auto-recovery disabled");
            return Ok(None);
        }

        let Some(latest) = self.checkpoint_manager.get_latest_checkpoint().await? else {
            info!("No checkpoint found; starting fresh");
            return Ok(None);
        };

        let complete_state = self.checkpoint_manager.config().complete_state.as_str();
        if latest.current_state() == complete_state {
            info!(
                "Latest checkpoint {} is in {}; nothing to recover",
                latest.id, complete_state
            );
            return Ok(None);
        }

        info!("Attempting auto-recovery from checkpoint {}", latest.id);
        let result = self
            .recover(RecoveryOptions::new(latest.id.to_string()))
            .await?;
        if !result.success {
            warn!(
                "Auto-recovery from {} did not succeed: {}",
                latest.id,
                result.errors.join("; ")
            );
        }
        Ok(Some(result))
    }

    /// Diagnose whether a checkpoint can be recovered, with hints for the
    /// operator. Touches no collaborator.
    pub async fn get_recovery_status(&self, id: &str) -> Result<RecoveryStatus, CheckpointError> {
        let checkpoint = self
            .checkpoint_manager
            .get_checkpoint(id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;

        let mut blockers = checkpoint.recovery.blockers.clone();
        let integrity_ok = match self.checkpoint_manager.validate(&checkpoint) {
            Ok(()) => true,
            Err(e) => {
                blockers.push(format!("integrity validation failed: {}", e));
                false
            }
        };

        let mut suggestions = Vec::new();
        if blockers.iter().any(|b| b.contains("exceeded retry limit")) {
            suggestions.push(
                "Recover with skip_failed_agent to leave agents that exhausted their retries untouched"
                    .to_string(),
            );
        }
        if blockers.iter().any(|b| b.contains("terminal state")) {
            suggestions.push(
                "Recover with reset_to_state set to an earlier state from the history".to_string(),
            );
        }

        Ok(RecoveryStatus {
            can_recover: checkpoint.recovery.can_resume && integrity_ok,
            blockers,
            suggestions,
        })
    }

    /// Recovery points, newest first.
    pub async fn list_recovery_points(&self) -> Result<Vec<RecoveryPoint>, CheckpointError> {
        let mut points: Vec<_> = self
            .checkpoint_manager
            .list_entries()
            .await?
            .into_iter()
            .map(|e| RecoveryPoint {
                id: e.id,
                created_at: e.created_at,
                trigger: e.trigger,
                state: e.state,
                can_resume: e.can_resume,
            })
            .collect();
        points.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(points)
    }
}

fn failed_agents(checkpoint: &Checkpoint) -> Vec<String> {
    checkpoint
        .agents
        .iter()
        .filter(|a| a.status == AgentStatus::Failed)
        .map(|a| a.agent_id.clone())
        .collect()
}

fn fatal(mut result: RecoveryResult, checkpoint: Checkpoint, message: String) -> RecoveryResult {
    result.success = false;
    result.restored_state = None;
    result.errors.push(message);
    result.checkpoint = Some(checkpoint);
    result
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
