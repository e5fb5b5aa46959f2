//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use crate::config::OrchestratorConfig;
use crate::coordinator::ExecutionCoordinator;
use crate::entity::ExecutionRef;
use anyhow::{Context, Result};
use std::path::Path;

/// Write a starter config file unless one exists
pub fn init(target: &Path, handler: &dyn OutputHandler) -> Result<i32> {
    if target.exists() {
        handler.emit(OutputEvent::Info {
            message: format!("Config already exists at {}", target.display()),
        });
        return Ok(0);
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(target, OrchestratorConfig::template())
        .with_context(|| format!("writing {}", target.display()))?;

    handler.emit(OutputEvent::Info {
        message: format!("✓ Wrote {}", target.display()),
    });
    Ok(0)
}

/// Show an execution, optionally with its node executions
pub async fn show(
    coordinator: &ExecutionCoordinator,
    execute_id: i64,
    include_nodes: bool,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let execution = coordinator
        .get_execution(&ExecutionRef::new(execute_id, 0), include_nodes)
        .await?;

    handler.emit(OutputEvent::execution(&execution));
    for event in &execution.interrupt_events {
        handler.emit(OutputEvent::interrupt(event));
    }
    for node in &execution.node_executions {
        handler.emit(OutputEvent::node(node));
    }
    Ok(0)
}

/// Show one node execution and, for batch node debugging, its iterations
pub async fn node(
    coordinator: &ExecutionCoordinator,
    execute_id: i64,
    node_id: &str,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let (node, inner) = coordinator.get_node_execution(execute_id, node_id).await?;
    handler.emit(OutputEvent::node(&node));
    if let Some(inner) = inner {
        handler.emit(OutputEvent::node(&inner));
    }
    Ok(0)
}

/// List pending interrupt events, oldest first
pub async fn interrupts(
    coordinator: &ExecutionCoordinator,
    execute_id: i64,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    let events = coordinator
        .stores()
        .interrupts
        .list_interrupt_events(execute_id)
        .await?;

    if events.is_empty() {
        handler.emit(OutputEvent::Info {
            message: "(no pending interrupts)".into(),
        });
    }
    for event in &events {
        handler.emit(OutputEvent::interrupt(event));
    }
    Ok(0)
}

pub async fn cancel(
    coordinator: &ExecutionCoordinator,
    execute_id: i64,
    workflow_id: i64,
    space_id: i64,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    coordinator.cancel(execute_id, workflow_id, space_id).await?;
    handler.emit(OutputEvent::Cancelled { execute_id });
    Ok(0)
}

/// Entry node input of the user's latest test run
pub async fn latest_test_run(
    coordinator: &ExecutionCoordinator,
    workflow_id: i64,
    user_id: i64,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    match coordinator.get_latest_test_run_input(workflow_id, user_id).await {
        Some(node) => {
            handler.emit(OutputEvent::node(&node));
            if let Some(input) = &node.input {
                handler.emit(OutputEvent::Info {
                    message: format!("  input: {}", input),
                });
            }
            Ok(0)
        }
        None => {
            handler.emit(OutputEvent::Info {
                message: "(no test run recorded)".into(),
            });
            Ok(1)
        }
    }
}

pub async fn latest_node_debug(
    coordinator: &ExecutionCoordinator,
    workflow_id: i64,
    node_id: &str,
    user_id: i64,
    handler: &dyn OutputHandler,
) -> Result<i32> {
    match coordinator
        .get_latest_node_debug_input(workflow_id, node_id, user_id)
        .await
    {
        Some((node, inner)) => {
            handler.emit(OutputEvent::node(&node));
            if let Some(inner) = inner {
                handler.emit(OutputEvent::node(&inner));
            }
            Ok(0)
        }
        None => {
            handler.emit(OutputEvent::Info {
                message: "(no node debug run recorded)".into(),
            });
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{
        InterruptEvent, InterruptEventType, NodeExecution, NodeType, WorkflowExecuteStatus,
        WorkflowExecution,
    };
    use crate::store::{ExecutionHistoryStore, InterruptEventStore, MemoryStore, Stores};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct MockHandler {
        events: Arc<Mutex<Vec<OutputEvent>>>,
    }

    impl MockHandler {
        fn new() -> Self {
            Self {
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn events(&self) -> Vec<OutputEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl OutputHandler for MockHandler {
        fn emit(&self, event: OutputEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    async fn interrupted_execution() -> (Arc<MemoryStore>, ExecutionCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let mut exe = WorkflowExecution::running(10, 1, String::new(), 2);
        exe.status = WorkflowExecuteStatus::Interrupted;
        store.create_workflow_execution(&exe).await.unwrap();
        store
            .create_node_execution(&NodeExecution::started(
                11,
                10,
                "qa",
                "Ask",
                NodeType::QuestionAnswer,
            ))
            .await
            .unwrap();
        store
            .save_interrupt_events(
                10,
                &[InterruptEvent::new(
                    12,
                    "qa",
                    NodeType::QuestionAnswer,
                    InterruptEventType::Question,
                    "{}",
                )],
            )
            .await
            .unwrap();
        let coordinator = ExecutionCoordinator::new(Stores::from_backend(store.clone()));
        (store, coordinator)
    }

    #[test]
    fn test_init_writes_template_once() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/config.toml");
        let handler = MockHandler::new();

        assert_eq!(init(&target, &handler).unwrap(), 0);
        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.contains("[execution]"));

        std::fs::write(&target, "# mine\n").unwrap();
        init(&target, &handler).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "# mine\n");
        assert_eq!(handler.events().len(), 2);
    }

    #[tokio::test]
    async fn test_show_with_nodes() {
        let (_, coordinator) = interrupted_execution().await;
        let handler = MockHandler::new();

        show(&coordinator, 10, true, &handler).await.unwrap();

        let events = handler.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], OutputEvent::Execution { id: 10, .. }));
        assert!(matches!(events[1], OutputEvent::Interrupt { id: 12, .. }));
        assert!(matches!(events[2], OutputEvent::Node { .. }));
    }

    #[tokio::test]
    async fn test_cancel_and_interrupts() {
        let (store, coordinator) = interrupted_execution().await;
        let handler = MockHandler::new();

        interrupts(&coordinator, 10, &handler).await.unwrap();
        cancel(&coordinator, 10, 1, 2, &handler).await.unwrap();

        let events = handler.events();
        assert!(matches!(events[0], OutputEvent::Interrupt { .. }));
        assert!(matches!(events[1], OutputEvent::Cancelled { execute_id: 10 }));
        let exe = store.get_workflow_execution(10).await.unwrap().unwrap();
        assert_eq!(exe.status, WorkflowExecuteStatus::Cancel);

        assert!(cancel(&coordinator, 10, 99, 2, &handler).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_lookups_report_missing() {
        let (_, coordinator) = interrupted_execution().await;
        let handler = MockHandler::new();

        assert_eq!(latest_test_run(&coordinator, 1, 9, &handler).await.unwrap(), 1);
        assert_eq!(
            latest_node_debug(&coordinator, 1, "qa", 9, &handler)
                .await
                .unwrap(),
            1
        );
        assert!(node(&coordinator, 10, "missing", &handler).await.is_err());
    }
}
