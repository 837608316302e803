//! Checkpoint data structures.
//!
//! The JSON shape (camelCase field names) is the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    Manual,
    StateTransition,
    Error,
    Periodic,
    ApprovalPending,
}

impl std::fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointTrigger::Manual => write!(f, "manual"),
            CheckpointTrigger::StateTransition => write!(f, "state_transition"),
            CheckpointTrigger::Error => write!(f, "error"),
            CheckpointTrigger::Periodic => write!(f, "periodic"),
            CheckpointTrigger::ApprovalPending => write!(f, "approval_pending"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Active,
    Archived,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointStatus::Active => write!(f, "active"),
            CheckpointStatus::Archived => write!(f, "archived"),
        }
    }
}

/// One visit to a workflow state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateHistoryEntry {
    pub state: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited_at: Option<DateTime<Utc>>,
    pub trigger: String,
}

impl StateHistoryEntry {
    pub fn new(state: impl Into<String>, entered_at: DateTime<Utc>, trigger: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            entered_at,
            exited_at: None,
            trigger: trigger.into(),
        }
    }

    pub fn exited(mut self, exited_at: DateTime<Utc>) -> Self {
        self.exited_at = Some(exited_at);
        self
    }
}

/// State-machine position of the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    pub current_state: String,
    pub state_history: Vec<StateHistoryEntry>,
    /// State to roll back to when `current_state` is a terminal error state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Pending => write!(f, "pending"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Execution substate of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl AgentSnapshot {
    pub fn new(agent_id: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            input: None,
            output: None,
            attempts: 0,
            token_usage: None,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

/// A recorded decision in the shared context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub decision: String,
    pub rationale: String,
    pub made_at: DateTime<Utc>,
}

/// Shared context visible to all agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub project_id: String,
    pub session_id: String,
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_breakdown: Option<serde_json::Value>,
    #[serde(default)]
    pub lessons: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl ContextSnapshot {
    pub fn new(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            session_id: session_id.into(),
            task_description: task_description.into(),
            work_breakdown: None,
            lessons: Vec::new(),
            decisions: Vec::new(),
        }
    }
}

/// Resumability verdict computed when the checkpoint was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryInfo {
    pub can_resume: bool,
    #[serde(default)]
    pub blockers: Vec<String>,
}

impl RecoveryInfo {
    pub fn resumable() -> Self {
        Self {
            can_resume: true,
            blockers: Vec::new(),
        }
    }

    pub fn blocked(blockers: Vec<String>) -> Self {
        Self {
            can_resume: false,
            blockers,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    /// Persisted byte length (post-compression when compression is enabled).
    #[serde(default)]
    pub checkpoint_size: u64,
}

/// A durable snapshot of workflow-engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub status: CheckpointStatus,
    pub workflow: WorkflowSnapshot,
    pub agents: Vec<AgentSnapshot>,
    pub context: ContextSnapshot,
    pub recovery: RecoveryInfo,
    #[serde(default)]
    pub metadata: CheckpointMetadata,
}

impl Checkpoint {
    /// Create an active checkpoint with a fresh v4 id.
    pub fn new(
        trigger: CheckpointTrigger,
        workflow: WorkflowSnapshot,
        agents: Vec<AgentSnapshot>,
        context: ContextSnapshot,
        recovery: RecoveryInfo,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            trigger,
            status: CheckpointStatus::Active,
            workflow,
            agents,
            context,
            recovery,
            metadata: CheckpointMetadata::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckpointStatus::Active
    }

    pub fn current_state(&self) -> &str {
        &self.workflow.current_state
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    /// Index projection of this checkpoint stored under `file_name`.
    pub fn index_entry(&self, file_name: impl Into<String>) -> CheckpointIndexEntry {
        CheckpointIndexEntry {
            id: self.id,
            created_at: self.created_at,
            trigger: self.trigger,
            status: self.status,
            state: self.workflow.current_state.clone(),
            can_resume: self.recovery.can_resume,
            size: self.metadata.checkpoint_size,
            path: file_name.into(),
        }
    }
}

/// Lightweight listing entry kept in `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointIndexEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub status: CheckpointStatus,
    pub state: String,
    pub can_resume: bool,
    pub size: u64,
    /// File name relative to the store's base directory.
    pub path: String,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStats {
    pub count: usize,
    pub total_size: u64,
    pub oldest_checkpoint: Option<DateTime<Utc>>,
    pub newest_checkpoint: Option<DateTime<Utc>>,
}
