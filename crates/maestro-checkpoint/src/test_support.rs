//! Shared fixtures for unit tests.

use chrono::{DateTime, Duration, Utc};

use crate::checkpoint::{
    AgentSnapshot, AgentStatus, Checkpoint, CheckpointTrigger, ContextSnapshot, Decision,
    RecoveryInfo, StateHistoryEntry, WorkflowSnapshot,
};

/// History visiting `states` one minute apart, ending in the last state.
pub(crate) fn workflow(states: &[&str]) -> WorkflowSnapshot {
    let start = Utc::now() - Duration::hours(1);
    let last = states.len().saturating_sub(1);
    let state_history = states
        .iter()
        .enumerate()
        .map(|(i, state)| {
            let entered = start + Duration::minutes(i as i64);
            let entry = StateHistoryEntry::new(*state, entered, "advance");
            if i < last {
                entry.exited(entered + Duration::minutes(1))
            } else {
                entry
            }
        })
        .collect();

    WorkflowSnapshot {
        current_state: states.last().map(|s| s.to_string()).unwrap_or_default(),
        state_history,
        rollback_target: None,
    }
}

pub(crate) fn context() -> ContextSnapshot {
    let mut ctx = ContextSnapshot::new("proj-7", "sess-42", "Refactor the billing service");
    ctx.lessons.push("Run migrations before tests".to_string());
    ctx.decisions.push(Decision {
        id: "d1".to_string(),
        decision: "Use PostgreSQL".to_string(),
        rationale: "Existing ops tooling".to_string(),
        made_at: Utc::now(),
    });
    ctx.work_breakdown = Some(serde_json::json!({"tasks": ["schema", "api"]}));
    ctx
}

/// Resumable checkpoint in EXECUTING with one completed agent.
pub(crate) fn checkpoint_at(created_at: DateTime<Utc>) -> Checkpoint {
    let mut cp = Checkpoint::new(
        CheckpointTrigger::Periodic,
        workflow(&["PLANNING", "EXECUTING"]),
        vec![AgentSnapshot::new("planner", AgentStatus::Completed)
            .with_attempts(1)
            .with_output(serde_json::json!({"plan": "two steps"}))],
        context(),
        RecoveryInfo::resumable(),
    );
    cp.created_at = created_at;
    cp
}
