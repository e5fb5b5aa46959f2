//! Resuming interrupted runs

use super::{ExecutionCoordinator, Snapshot, compile_error, parse_canvas};
use crate::engine::{CompileOptions, Graph, WorkflowSchema};
use crate::entity::{
    ExecuteConfig, ExecuteMode, GetPolicy, Locator, ResumeRequest, TerminatePlan, Workflow,
    WorkflowExecuteStatus, WorkflowExecution,
};
use crate::error::{OrchestratorError, Result};
use crate::runner::{MessageStream, RunInputs, pipe, spawn_run};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// A rebuilt graph for an interrupted execution
struct ResumeTarget {
    workflow: Workflow,
    schema: Arc<dyn WorkflowSchema>,
    graph: Arc<dyn Graph>,
    config: ExecuteConfig,
}

impl ExecutionCoordinator {
    /// Resume in the background; callers poll for progress
    pub async fn async_resume(&self, request: &ResumeRequest, config: ExecuteConfig) -> Result<()> {
        let target = self.resume_gate(request, config).await?;
        let prepared = self
            .runner()
            .prepare(
                &target.workflow.basic(),
                target.schema.as_ref(),
                target.config,
                RunInputs::resume(request.clone()),
            )
            .await?;
        spawn_run(target.graph, None, prepared.context);
        Ok(())
    }

    /// Resume and wait for the terminal outcome
    ///
    /// The returned execution keeps the original id and carries the resume
    /// payload as its input.
    pub async fn sync_resume(
        &self,
        request: &ResumeRequest,
        config: ExecuteConfig,
    ) -> Result<(WorkflowExecution, TerminatePlan)> {
        let ResumeTarget {
            workflow,
            schema,
            graph,
            config,
        } = self.resume_gate(request, config).await?;

        let created_at = Utc::now();
        let prepared = self
            .runner()
            .prepare(
                &workflow.basic(),
                schema.as_ref(),
                config.clone(),
                RunInputs::resume(request.clone()),
            )
            .await?;
        let plan = graph.terminate_plan();
        let (output, event) = self.run_to_completion(prepared, graph, None).await?;

        let execution = Snapshot {
            execute_id: request.execute_id,
            workflow: &workflow,
            config,
            node_count: schema.node_count(),
            input: request.resume_data.clone(),
            created_at,
        }
        .into_execution(event, output, plan)?;
        Ok((execution, plan))
    }

    /// Resume and stream the resumed run's messages
    pub async fn stream_resume(
        &self,
        request: &ResumeRequest,
        config: ExecuteConfig,
    ) -> Result<MessageStream> {
        let target = self.resume_gate(request, config).await?;
        let (writer, stream) = pipe(self.settings.stream_buffer);
        let prepared = self
            .runner()
            .prepare(
                &target.workflow.basic(),
                target.schema.as_ref(),
                target.config,
                RunInputs::resume(request.clone()).with_stream(writer),
            )
            .await?;
        spawn_run(target.graph, None, prepared.context);
        Ok(stream)
    }

    /// Check that an execution can be resumed and rebuild its graph
    async fn resume_gate(
        &self,
        request: &ResumeRequest,
        mut config: ExecuteConfig,
    ) -> Result<ResumeTarget> {
        let engine = self.engine()?;
        let execute_id = request.execute_id;

        let execution = self
            .stores
            .history
            .get_workflow_execution(execute_id)
            .await?
            .ok_or_else(|| OrchestratorError::execution_not_found(execute_id))?;

        if !execution.is_root() {
            return Err(OrchestratorError::invalid_state(
                "only root workflow can be resumed",
            ));
        }
        if execution.status != WorkflowExecuteStatus::Interrupted {
            return Err(OrchestratorError::not_interrupted(
                execute_id,
                execution.status,
            ));
        }

        let stored = &execution.execute_config;
        let from = if execution.version.is_empty() {
            Locator::Draft
        } else {
            Locator::SpecificVersion
        };
        let policy = GetPolicy::new(execution.workflow_id, from)
            .with_version(execution.version.clone())
            .with_commit(stored.commit_id.clone());
        let workflow = self.load_workflow(&policy).await?;
        let canvas = parse_canvas(&workflow)?;

        config.from = from;
        config.version = execution.version.clone();
        config.app_id = stored.app_id;
        config.agent_id = stored.agent_id;
        config.commit_id = stored.commit_id.clone();
        config.workflow_mode = workflow.mode;
        if config.connector_id == 0 {
            config.connector_id = stored.connector_id;
        }

        let (schema, graph) = if stored.mode == ExecuteMode::NodeDebug {
            let nodes = self
                .stores
                .history
                .get_node_executions_by_exe_id(execution.id)
                .await?;
            let node_id = nodes
                .into_iter()
                .find(|node| node.parent_node_id.is_none())
                .map(|node| node.node_id)
                .ok_or_else(|| {
                    OrchestratorError::invalid_state(format!(
                        "during node debug resume, no node execution found for workflow execution {}",
                        execution.id
                    ))
                })?;

            let schema = engine
                .schema_from_node(&canvas, &node_id)
                .await
                .map_err(compile_error("failed to convert canvas to workflow schema"))?;
            let graph = engine
                .compile_from_node(
                    schema.clone(),
                    &node_id,
                    CompileOptions::named(execution.workflow_id.to_string()),
                )
                .await
                .map_err(compile_error("failed to create workflow"))?;
            config.mode = ExecuteMode::NodeDebug;
            (schema, graph)
        } else {
            let schema = engine
                .canvas_to_schema(&canvas)
                .await
                .map_err(compile_error("failed to convert canvas to workflow schema"))?;
            let graph = engine
                .compile(schema.clone(), self.compile_options(execution.workflow_id))
                .await
                .map_err(compile_error("failed to create workflow"))?;
            (schema, graph)
        };

        info!(
            execute_id,
            event_id = request.event_id,
            mode = ?config.mode,
            "resume accepted"
        );

        Ok(ResumeTarget {
            workflow,
            schema,
            graph,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::ExecutionSettings;
    use super::super::testing::{FakeEngine, canvas};
    use super::*;
    use crate::engine::Variables;
    use crate::entity::{MessageKind, NodeType, WorkflowMode};
    use crate::store::{
        ExecutionHistoryStore, InterruptEventStore, MemoryStore, MemoryWorkflowRepository, Stores,
    };
    use std::time::Duration;

    async fn setup(script: &str) -> (Arc<MemoryStore>, Arc<FakeEngine>, ExecutionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(MemoryWorkflowRepository::new());
        repo.insert(Workflow {
            id: 1,
            space_id: 20,
            app_id: Some(70),
            version: String::new(),
            commit_id: "c-1".into(),
            mode: WorkflowMode::Workflow,
            canvas: canvas(script),
        })
        .await;
        let engine = Arc::new(FakeEngine::default());
        let coordinator = ExecutionCoordinator::new(Stores::from_backend(store.clone()))
            .with_engine(engine.clone())
            .with_repository(repo)
            .with_settings(ExecutionSettings {
                cancel_poll_interval: Duration::from_millis(5),
                ..Default::default()
            });
        (store, engine, coordinator)
    }

    fn config(mode: ExecuteMode) -> ExecuteConfig {
        ExecuteConfig::new(1, Locator::Draft, mode, 9).with_connector(1024)
    }

    async fn interrupted(coordinator: &ExecutionCoordinator, mode: ExecuteMode) -> (i64, i64) {
        let (exe, _) = coordinator
            .sync_execute(config(mode), Variables::new())
            .await
            .unwrap();
        assert_eq!(exe.status, WorkflowExecuteStatus::Interrupted);
        (exe.id, exe.interrupt_events[0].id)
    }

    async fn wait_until(store: &MemoryStore, id: i64, status: WorkflowExecuteStatus) {
        for _ in 0..200 {
            let exe = store.get_workflow_execution(id).await.unwrap().unwrap();
            if exe.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_resume_rejected_unless_interrupted() {
        let (_, _, coordinator) = setup("succeed").await;
        let (exe, _) = coordinator
            .sync_execute(config(ExecuteMode::Debug), Variables::new())
            .await
            .unwrap();

        let request = ResumeRequest::new(exe.id, 0, "x");
        let err = coordinator
            .async_resume(&request, config(ExecuteMode::Debug))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert!(err.to_string().contains("status is success"));

        let err = coordinator
            .sync_resume(&ResumeRequest::new(404, 0, "x"), config(ExecuteMode::Debug))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resume_rejected_for_sub_execution() {
        let (store, _, coordinator) = setup("interrupt").await;
        let mut child = WorkflowExecution::running(500, 1, String::new(), 20);
        child.root_execution_id = 499;
        child.status = WorkflowExecuteStatus::Interrupted;
        store.create_workflow_execution(&child).await.unwrap();

        let err = coordinator
            .stream_resume(&ResumeRequest::new(500, 0, "x"), config(ExecuteMode::Debug))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert!(err.to_string().contains("only root"));
    }

    #[tokio::test]
    async fn test_async_resume_reseeds_config() {
        let (store, engine, coordinator) = setup("interrupt").await;
        let (id, event_id) = interrupted(&coordinator, ExecuteMode::Debug).await;

        let caller = ExecuteConfig::new(1, Locator::LatestVersion, ExecuteMode::Debug, 9);
        coordinator
            .async_resume(&ResumeRequest::new(id, event_id, "yes"), caller)
            .await
            .unwrap();
        wait_until(&store, id, WorkflowExecuteStatus::Success).await;

        assert!(store.list_interrupt_events(id).await.unwrap().is_empty());
        let compiled = engine.compiled.lock().unwrap();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1].graph_name, "1");

        let inputs = engine.inputs.lock().unwrap();
        assert!(inputs[1].is_none());
    }

    #[tokio::test]
    async fn test_sync_resume_snapshot_and_config() {
        let (_, _, coordinator) = setup("interrupt").await;
        let (id, event_id) = interrupted(&coordinator, ExecuteMode::Debug).await;

        let caller = ExecuteConfig::new(1, Locator::LatestVersion, ExecuteMode::Debug, 9);
        let (exe, plan) = coordinator
            .sync_resume(&ResumeRequest::new(id, event_id, "ok"), caller)
            .await
            .unwrap();

        assert_eq!(plan, TerminatePlan::UseAnswerContent);
        assert_eq!(exe.id, id);
        assert_eq!(exe.root_execution_id, id);
        assert_eq!(exe.status, WorkflowExecuteStatus::Success);
        assert_eq!(exe.input.as_deref(), Some("ok"));
        assert_eq!(exe.node_count, 3);
        assert_eq!(exe.execute_config.from, Locator::Draft);
        assert_eq!(exe.execute_config.app_id, Some(70));
        assert_eq!(exe.execute_config.commit_id, "c-1");
        assert_eq!(exe.execute_config.connector_id, 1024);
    }

    #[tokio::test]
    async fn test_second_resume_of_same_event_rejected() {
        let (store, _, coordinator) = setup("interrupt").await;
        let (id, event_id) = interrupted(&coordinator, ExecuteMode::Debug).await;

        coordinator
            .sync_resume(&ResumeRequest::new(id, event_id, "a"), config(ExecuteMode::Debug))
            .await
            .unwrap();
        let err = coordinator
            .sync_resume(&ResumeRequest::new(id, event_id, "b"), config(ExecuteMode::Debug))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());

        let exe = store.get_workflow_execution(id).await.unwrap().unwrap();
        assert_eq!(exe.status, WorkflowExecuteStatus::Success);
    }

    #[tokio::test]
    async fn test_node_debug_resume_rebuilds_from_root_node() {
        let (_, engine, coordinator) = setup("interrupt").await;
        let id = coordinator
            .async_execute_node("qa_node", config(ExecuteMode::NodeDebug), Variables::new())
            .await
            .unwrap();

        let store = coordinator.stores().history.clone();
        for _ in 0..200 {
            let exe = store.get_workflow_execution(id).await.unwrap().unwrap();
            if exe.status == WorkflowExecuteStatus::Interrupted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut stream = coordinator
            .stream_resume(&ResumeRequest::new(id, 0, "go"), config(ExecuteMode::Debug))
            .await
            .unwrap();
        let mut last = None;
        while let Some(message) = stream.recv().await {
            last = Some(message);
        }
        assert_eq!(
            last.unwrap().kind,
            MessageKind::State {
                status: WorkflowExecuteStatus::Success,
                usage: Some(Default::default()),
            }
        );

        assert_eq!(
            *engine.from_node.lock().unwrap(),
            vec!["qa_node".to_string(), "qa_node".to_string()]
        );
        let nodes = store.get_node_executions_by_exe_id(id).await.unwrap();
        assert!(nodes.iter().all(|n| n.node_type == NodeType::Entry));
        let exe = store.get_workflow_execution(id).await.unwrap().unwrap();
        assert_eq!(exe.execute_config.mode, ExecuteMode::NodeDebug);
    }

    #[tokio::test]
    async fn test_node_debug_resume_without_nodes() {
        let (store, _, coordinator) = setup("interrupt").await;
        let mut exe = WorkflowExecution::running(600, 1, String::new(), 20);
        exe.status = WorkflowExecuteStatus::Interrupted;
        exe.execute_config.mode = ExecuteMode::NodeDebug;
        store.create_workflow_execution(&exe).await.unwrap();

        let err = coordinator
            .async_resume(&ResumeRequest::new(600, 0, "x"), config(ExecuteMode::Debug))
            .await
            .unwrap_err();
        assert!(err.is_invalid_state());
        assert!(err.to_string().contains("no node execution found"));
    }
}
