//! Collaborators that recovery replays a checkpoint into.
//!
//! These are owned by the surrounding orchestrator. Recovery works with any
//! subset of them wired in and reports what it could not restore.

use async_trait::async_trait;
use std::sync::Arc;

use crate::checkpoint::{
    AgentSnapshot, AgentStatus, ContextSnapshot, Decision, StateHistoryEntry, TokenUsage,
};
use crate::error::CheckpointError;

/// The workflow state machine.
#[async_trait]
pub trait RestorableStateGraph: Send + Sync {
    async fn reset(&self) -> Result<(), CheckpointError>;

    async fn transition_to(&self, state: &str, trigger: &str) -> Result<(), CheckpointError>;

    /// Append an audit entry without running any transition side effects.
    async fn record_history(&self, entry: &StateHistoryEntry) -> Result<(), CheckpointError>;

    async fn set_replay_mode(&self, enabled: bool) -> Result<(), CheckpointError>;
}

/// Agent substate handed back to a live agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRestoreState {
    pub status: AgentStatus,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub attempts: u32,
    pub token_usage: Option<TokenUsage>,
}

impl AgentRestoreState {
    /// Normalize a recorded snapshot for restoration.
    ///
    /// A recorded `running` agent comes back as `pending`: the execution that
    /// was in flight died with the old process.
    pub fn from_snapshot(snapshot: &AgentSnapshot) -> Self {
        let status = match snapshot.status {
            AgentStatus::Running => AgentStatus::Pending,
            other => other,
        };
        Self {
            status,
            input: snapshot.input.clone(),
            output: snapshot.output.clone(),
            attempts: snapshot.attempts,
            token_usage: snapshot.token_usage,
        }
    }
}

#[async_trait]
pub trait RestorableAgent: Send + Sync {
    async fn restore_state(&self, state: AgentRestoreState) -> Result<(), CheckpointError>;
}

#[async_trait]
pub trait RestorableAgentRegistry: Send + Sync {
    async fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn RestorableAgent>>;
}

/// Shared context handed back to the context manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRestoreState {
    pub project_id: String,
    pub session_id: String,
    pub task_description: String,
    pub work_breakdown: Option<serde_json::Value>,
    pub lessons: Vec<String>,
    pub decisions: Vec<Decision>,
}

impl From<&ContextSnapshot> for ContextRestoreState {
    fn from(ctx: &ContextSnapshot) -> Self {
        Self {
            project_id: ctx.project_id.clone(),
            session_id: ctx.session_id.clone(),
            task_description: ctx.task_description.clone(),
            work_breakdown: ctx.work_breakdown.clone(),
            lessons: ctx.lessons.clone(),
            decisions: ctx.decisions.clone(),
        }
    }
}

#[async_trait]
pub trait RestorableContextManager: Send + Sync {
    async fn restore(&self, context: ContextRestoreState) -> Result<(), CheckpointError>;
}
