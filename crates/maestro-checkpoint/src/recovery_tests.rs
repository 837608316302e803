
    use super::*;
    use crate::checkpoint::{AgentSnapshot, RecoveryInfo, StateHistoryEntry};
    use crate::config::ManagerConfig;
    use crate::restore::RestorableAgent;
    use crate::store::{CheckpointStore, MemoryCheckpointStore};
    use crate::test_support::{context, workflow};
    use async_trait::async_trait;
    use chrono::Duration;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct RecordingGraph {
        calls: Mutex<Vec<String>>,
        fail_transition: bool,
    }

    #[async_trait]
    impl RestorableStateGraph for RecordingGraph {
        async fn reset(&self) -> Result<(), CheckpointError> {
            self.calls.lock().push("reset".to_string());
            Ok(())
        }

        async fn transition_to(&self, state: &str, trigger: &str) -> Result<(), CheckpointError> {
            if self.fail_transition {
                return Err(CheckpointError::Recovery(format!("no edge to {}", state)));
            }
            self.calls.lock().push(format!("transition:{}:{}", state, trigger));
            Ok(())
        }

        async fn record_history(&self, entry: &StateHistoryEntry) -> Result<(), CheckpointError> {
            self.calls.lock().push(format!("history:{}", entry.state));
            Ok(())
        }

        async fn set_replay_mode(&self, enabled: bool) -> Result<(), CheckpointError> {
            self.calls.lock().push(format!("replay:{}", enabled));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAgent {
        restored: Mutex<Vec<AgentRestoreState>>,
        fail: bool,
    }

    #[async_trait]
    impl RestorableAgent for FakeAgent {
        async fn restore_state(&self, state: AgentRestoreState) -> Result<(), CheckpointError> {
            if self.fail {
                return Err(CheckpointError::Recovery("agent rejected state".to_string()));
            }
            self.restored.lock().push(state);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        agents: HashMap<String, Arc<FakeAgent>>,
    }

    impl FakeRegistry {
        fn with(mut self, id: &str, agent: FakeAgent) -> Self {
            self.agents.insert(id.to_string(), Arc::new(agent));
            self
        }

        fn agent(&self, id: &str) -> &FakeAgent {
            &self.agents[id]
        }
    }

    #[async_trait]
    impl RestorableAgentRegistry for FakeRegistry {
        async fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn RestorableAgent>> {
            self.agents
                .get(agent_id)
                .map(|a| a.clone() as Arc<dyn RestorableAgent>)
        }
    }

    #[derive(Default)]
    struct FakeContextManager {
        restored: Mutex<Option<ContextRestoreState>>,
        fail: bool,
    }

    #[async_trait]
    impl RestorableContextManager for FakeContextManager {
        async fn restore(&self, context: ContextRestoreState) -> Result<(), CheckpointError> {
            if self.fail {
                return Err(CheckpointError::Recovery("context store offline".to_string()));
            }
            *self.restored.lock() = Some(context);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryCheckpointStore>,
        manager: Arc<CheckpointManager>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryCheckpointStore::new());
            let manager = Arc::new(CheckpointManager::new(ManagerConfig::default(), store.clone()));
            Self { store, manager }
        }

        fn recovery(&self) -> RecoveryManager {
            RecoveryManager::new(self.manager.clone(), RecoveryConfig::default())
        }

        /// Persist a checkpoint whose recovery verdict matches its contents.
        async fn save(&self, states: &[&str], agents: Vec<AgentSnapshot>) -> Checkpoint {
            let wf = workflow(states);
            let verdict = self.manager.assess(&wf, &agents);
            let mut cp = Checkpoint::new(CheckpointTrigger::StateTransition, wf, agents, context(), verdict);
            self.store.save(&mut cp).await.unwrap();
            cp
        }
    }

    fn done(id: &str) -> AgentSnapshot {
        AgentSnapshot::new(id, AgentStatus::Completed)
            .with_attempts(1)
            .with_output(serde_json::json!({ "by": id }))
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let h = Harness::new();
        let id = Uuid::new_v4().to_string();
        let result = h.recovery().recover(RecoveryOptions::new(&id)).await.unwrap();
        assert!(!result.success);
        assert!(result.checkpoint.is_none());
        assert_eq!(result.errors, vec!["not found".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_id_propagates() {
        let h = Harness::new();
        let err = h
            .recovery()
            .recover(RecoveryOptions::new("../../etc/passwd"))
            .await
            .unwrap_err();
        assert!(err.is_security());
    }

    #[tokio::test]
    async fn test_integrity_failure_refuses() {
        let h = Harness::new();
        let mut cp = Checkpoint::new(
            CheckpointTrigger::Manual,
            workflow(&["EXECUTING"]),
            vec![],
            context(),
            RecoveryInfo::resumable(),
        );
        h.store.save(&mut cp).await.unwrap();

        let graph = Arc::new(RecordingGraph::default());
        let recovery = h.recovery().with_state_graph(graph.clone());
        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors, vec!["integrity validation failed".to_string()]);
        assert_eq!(result.warnings.len(), 1);
        assert!(graph.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_resumable_is_gated() {
        let h = Harness::new();
        let cp = h
            .save(
                &["EXECUTING"],
                vec![done("x"), AgentSnapshot::new("z", AgentStatus::Failed).with_attempts(3)],
            )
            .await;
        assert!(!cp.recovery.can_resume);

        let graph = Arc::new(RecordingGraph::default());
        let registry = Arc::new(FakeRegistry::default().with("x", FakeAgent::default()));
        let recovery = h
            .recovery()
            .with_state_graph(graph.clone())
            .with_agent_registry(registry.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors, cp.recovery.blockers);
        assert!(graph.calls.lock().is_empty());
        assert!(registry.agent("x").restored.lock().is_empty());
    }

    #[tokio::test]
    async fn test_replay_mode_alone_does_not_override_gate() {
        let h = Harness::new();
        let cp = h
            .save(
                &["EXECUTING"],
                vec![done("x"), AgentSnapshot::new("z", AgentStatus::Failed).with_attempts(3)],
            )
            .await;

        let graph = Arc::new(RecordingGraph::default());
        let result = h
            .recovery()
            .with_state_graph(graph.clone())
            .recover(RecoveryOptions::new(cp.id.to_string()).replay_mode())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors, cp.recovery.blockers);
        assert!(graph.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let h = Harness::new();
        let cp = h
            .save(
                &["PLANNING", "EXECUTING"],
                vec![done("a"), AgentSnapshot::new("b", AgentStatus::Failed).with_attempts(3)],
            )
            .await;

        let graph = Arc::new(RecordingGraph::default());
        let registry = Arc::new(FakeRegistry::default().with("a", FakeAgent::default()));
        let ctx = Arc::new(FakeContextManager::default());
        let recovery = h
            .recovery()
            .with_state_graph(graph.clone())
            .with_agent_registry(registry.clone())
            .with_context_manager(ctx.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()).skip_failed_agent().dry_run())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.restored_state.as_deref(), Some("EXECUTING"));
        assert_eq!(result.skipped_agents, vec!["b"]);
        assert!(result.warnings.iter().any(|w| w.contains("dry run")));
        assert!(graph.calls.lock().is_empty());
        assert!(registry.agent("a").restored.lock().is_empty());
        assert!(ctx.restored.lock().is_none());
    }

    #[tokio::test]
    async fn test_full_restore() {
        let h = Harness::new();
        let cp = h
            .save(
                &["PLANNING", "EXECUTING"],
                vec![done("planner"), AgentSnapshot::new("coder", AgentStatus::Running).with_attempts(2)],
            )
            .await;

        let graph = Arc::new(RecordingGraph::default());
        let registry = Arc::new(
            FakeRegistry::default()
                .with("planner", FakeAgent::default())
                .with("coder", FakeAgent::default()),
        );
        let ctx = Arc::new(FakeContextManager::default());
        let recovery = h
            .recovery()
            .with_state_graph(graph.clone())
            .with_agent_registry(registry.clone())
            .with_context_manager(ctx.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(result.success, "errors: {:?}", result.errors);
        assert!(result.warnings.is_empty(), "warnings: {:?}", result.warnings);
        assert_eq!(result.restored_state.as_deref(), Some("EXECUTING"));
        assert_eq!(result.restored_agents, vec!["planner", "coder"]);
        assert_eq!(
            *graph.calls.lock(),
            vec![
                "reset",
                "transition:EXECUTING:recovery",
                "history:PLANNING",
                "history:EXECUTING",
            ]
        );

        let coder = registry.agent("coder").restored.lock();
        assert_eq!(coder[0].status, AgentStatus::Pending);
        assert_eq!(coder[0].attempts, 2);

        let planner = registry.agent("planner").restored.lock();
        assert_eq!(planner[0].status, AgentStatus::Completed);
        assert_eq!(planner[0].output, Some(serde_json::json!({ "by": "planner" })));

        let restored = ctx.restored.lock();
        let restored = restored.as_ref().unwrap();
        assert_eq!(restored.session_id, "sess-42");
        assert_eq!(restored.decisions.len(), 1);
    }

    #[tokio::test]
    async fn test_selective_skip() {
        let h = Harness::new();
        let cp = h
            .save(
                &["EXECUTING"],
                vec![done("a"), AgentSnapshot::new("b", AgentStatus::Failed).with_attempts(1)],
            )
            .await;

        let registry = Arc::new(
            FakeRegistry::default()
                .with("a", FakeAgent::default())
                .with("b", FakeAgent::default()),
        );
        let recovery = h.recovery().with_agent_registry(registry.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()).skip_failed_agent())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.skipped_agents, vec!["b"]);
        assert_eq!(result.restored_agents, vec!["a"]);
        assert!(registry.agent("b").restored.lock().is_empty());
        assert_eq!(registry.agent("a").restored.lock()[0].status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_and_failing_agents_become_warnings() {
        let h = Harness::new();
        let cp = h
            .save(&["EXECUTING"], vec![done("ghost"), done("broken"), done("ok")])
            .await;

        let registry = Arc::new(
            FakeRegistry::default()
                .with("broken", FakeAgent { fail: true, ..Default::default() })
                .with("ok", FakeAgent::default()),
        );
        let recovery = h.recovery().with_agent_registry(registry.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.restored_agents, vec!["ok"]);
        assert!(result.warnings.iter().any(|w| w.contains("ghost")));
        assert!(result.warnings.iter().any(|w| w.contains("broken")));
        assert_eq!(registry.agent("ok").restored.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_context_failure_is_fatal() {
        let h = Harness::new();
        let cp = h.save(&["EXECUTING"], vec![done("a")]).await;

        let ctx = Arc::new(FakeContextManager { fail: true, ..Default::default() });
        let recovery = h.recovery().with_context_manager(ctx);

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.restored_state.is_none());
        assert!(result.errors[0].contains("context restoration failed"));
    }

    #[tokio::test]
    async fn test_state_graph_failure_is_fatal() {
        let h = Harness::new();
        let cp = h.save(&["EXECUTING"], vec![done("a")]).await;

        let graph = Arc::new(RecordingGraph { fail_transition: true, ..Default::default() });
        let ctx = Arc::new(FakeContextManager::default());
        let recovery = h
            .recovery()
            .with_state_graph(graph)
            .with_context_manager(ctx.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.errors[0].contains("workflow state restoration failed"));
        assert!(ctx.restored.lock().is_none());
    }

    #[tokio::test]
    async fn test_missing_collaborators_are_reported() {
        let h = Harness::new();
        let cp = h.save(&["EXECUTING"], vec![done("a")]).await;

        let result = h
            .recovery()
            .recover(RecoveryOptions::new(cp.id.to_string()))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings.iter().any(|w| w.contains("no state graph")));
        assert!(result.warnings.iter().any(|w| w.contains("no agent registry")));
        assert!(result.warnings.iter().any(|w| w.contains("no context manager")));
    }

    #[tokio::test]
    async fn test_replay_mode() {
        let h = Harness::new();
        let cp = h.save(&["EXECUTING"], vec![done("a")]).await;

        let graph = Arc::new(RecordingGraph::default());
        let recovery = h.recovery().with_state_graph(graph.clone());
        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()).replay_mode())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(graph.calls.lock().last().map(String::as_str), Some("replay:true"));
        assert!(result.warnings.iter().any(|w| w.contains("advance the workflow manually")));
    }

    #[tokio::test]
    async fn test_reset_to_state_lifts_terminal_gate() {
        let h = Harness::new();
        let cp = h
            .save(&["PLANNING", "EXECUTING", "ERROR"], vec![done("a")])
            .await;
        assert!(!cp.recovery.can_resume);

        let graph = Arc::new(RecordingGraph::default());
        let recovery = h.recovery().with_state_graph(graph.clone());

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()).reset_to_state("EXECUTING"))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.restored_state.as_deref(), Some("EXECUTING"));
        assert!(graph.calls.lock().contains(&"transition:EXECUTING:recovery".to_string()));
        assert!(!result.warnings.iter().any(|w| w.contains("does not appear")));

        let result = recovery
            .recover(RecoveryOptions::new(cp.id.to_string()).reset_to_state("REVIEWING"))
            .await
            .unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("REVIEWING does not appear")));
    }

    #[tokio::test]
    async fn test_auto_recovery_noops() {
        let h = Harness::new();
        assert!(h.recovery().attempt_auto_recovery().await.unwrap().is_none());

        h.save(&["EXECUTING", "COMPLETE"], vec![done("a")]).await;
        assert!(h.recovery().attempt_auto_recovery().await.unwrap().is_none());

        let disabled = RecoveryManager::new(h.manager.clone(), RecoveryConfig { auto_recover: false });
        assert!(disabled.attempt_auto_recovery().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_auto_recovery_uses_latest() {
        let h = Harness::new();
        let mut older = h.save(&["PLANNING"], vec![done("a")]).await;
        older.created_at = Utc::now() - Duration::hours(2);
        h.store.save(&mut older).await.unwrap();
        let latest = h.save(&["PLANNING", "EXECUTING"], vec![done("a")]).await;

        let result = h.recovery().attempt_auto_recovery().await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.checkpoint.map(|c| c.id), Some(latest.id));
        assert_eq!(result.restored_state.as_deref(), Some("EXECUTING"));
    }

    #[tokio::test]
    async fn test_auto_recovery_is_conservative() {
        let h = Harness::new();
        h.save(
            &["EXECUTING"],
            vec![AgentSnapshot::new("z", AgentStatus::Failed).with_attempts(5)],
        )
        .await;

        let result = h.recovery().attempt_auto_recovery().await.unwrap().unwrap();
        assert!(!result.success);
        assert!(result.errors[0].contains("z exceeded retry limit"));
    }

    #[tokio::test]
    async fn test_recovery_status_suggestions() {
        let h = Harness::new();
        let recovery = h.recovery();

        let retry = h
            .save(&["EXECUTING"], vec![AgentSnapshot::new("z", AgentStatus::Failed).with_attempts(3)])
            .await;
        let status = recovery.get_recovery_status(&retry.id.to_string()).await.unwrap();
        assert!(!status.can_recover);
        assert_eq!(status.suggestions.len(), 1);
        assert!(status.suggestions[0].contains("skip_failed_agent"));

        let terminal = h.save(&["EXECUTING", "ABORTED"], vec![done("a")]).await;
        let status = recovery.get_recovery_status(&terminal.id.to_string()).await.unwrap();
        assert!(status.suggestions[0].contains("reset_to_state"));

        let clean = h.save(&["EXECUTING"], vec![done("a")]).await;
        let status = recovery.get_recovery_status(&clean.id.to_string()).await.unwrap();
        assert_eq!(
            status,
            RecoveryStatus {
                can_recover: true,
                blockers: vec![],
                suggestions: vec![],
            }
        );

        let err = recovery
            .get_recovery_status(&Uuid::new_v4().to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_recovery_points_newest_first() {
        let h = Harness::new();
        let mut old = h.save(&["PLANNING"], vec![done("a")]).await;
        old.created_at = Utc::now() - Duration::days(1);
        h.store.save(&mut old).await.unwrap();
        let new = h
            .save(&["EXECUTING"], vec![AgentSnapshot::new("z", AgentStatus::Failed).with_attempts(3)])
            .await;

        let points = h.recovery().list_recovery_points().await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].id, new.id);
        assert!(!points[0].can_resume);
        assert_eq!(points[1].id, old.id);
        assert_eq!(points[1].state, "PLANNING");
    }
