//! In-process store implementations

use super::{
    CancelSignalStore, ExecutionHistoryStore, InterruptEventStore, WorkflowRepository,
};
use crate::entity::{
    ExecutionUpdate, GetPolicy, InterruptEvent, Locator, NodeExecuteStatus, NodeExecution,
    Workflow, WorkflowExecuteStatus, WorkflowExecution,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    executions: HashMap<i64, WorkflowExecution>,
    nodes: Vec<NodeExecution>,
    interrupts: HashMap<i64, VecDeque<InterruptEvent>>,
    cancel_flags: HashSet<i64>,
    test_run_latest: HashMap<(i64, i64), i64>,
    node_debug_latest: HashMap<(i64, String, i64), i64>,
}

/// Execution, interrupt and cancel stores kept in memory
///
/// Node rows are returned in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionHistoryStore for MemoryStore {
    async fn create_workflow_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.executions.contains_key(&execution.id) {
            bail!("workflow execution {} already exists", execution.id);
        }
        let mut row = execution.clone();
        row.interrupt_events.clear();
        row.node_executions.clear();
        state.executions.insert(row.id, row);
        Ok(())
    }

    async fn update_workflow_execution(
        &self,
        update: &ExecutionUpdate,
        allowed: &[WorkflowExecuteStatus],
    ) -> Result<(u64, WorkflowExecuteStatus)> {
        let mut state = self.state.lock().await;
        let Some(row) = state.executions.get_mut(&update.id) else {
            bail!("workflow execution {} not found", update.id);
        };
        if !allowed.contains(&row.status) {
            return Ok((0, row.status));
        }
        row.apply(update);
        Ok((1, row.status))
    }

    async fn try_lock_workflow_execution(
        &self,
        id: i64,
        resuming_event_id: i64,
    ) -> Result<(bool, WorkflowExecuteStatus)> {
        let mut state = self.state.lock().await;
        let Some(row) = state.executions.get_mut(&id) else {
            bail!("workflow execution {} not found", id);
        };
        if row.status != WorkflowExecuteStatus::Interrupted {
            return Ok((false, row.status));
        }
        row.status = WorkflowExecuteStatus::Running;
        row.current_resuming_event_id = Some(resuming_event_id);
        row.updated_at = Some(Utc::now());
        Ok((true, row.status))
    }

    async fn get_workflow_execution(&self, id: i64) -> Result<Option<WorkflowExecution>> {
        let state = self.state.lock().await;
        Ok(state.executions.get(&id).cloned())
    }

    async fn create_node_execution(&self, execution: &NodeExecution) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.nodes.iter().any(|n| n.id == execution.id) {
            bail!("node execution {} already exists", execution.id);
        }
        state.nodes.push(execution.clone());
        Ok(())
    }

    async fn update_node_execution(&self, execution: &NodeExecution) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.nodes.iter_mut().find(|n| n.id == execution.id) {
            Some(row) => {
                *row = execution.clone();
                Ok(())
            }
            None => bail!("node execution {} not found", execution.id),
        }
    }

    async fn cancel_all_running_nodes(&self, execute_id: i64) -> Result<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut changed = 0;
        for row in state
            .nodes
            .iter_mut()
            .filter(|n| n.execute_id == execute_id && n.status == NodeExecuteStatus::Running)
        {
            row.status = NodeExecuteStatus::Cancel;
            row.updated_at = Some(now);
            changed += 1;
        }
        Ok(changed)
    }

    async fn get_node_executions_by_exe_id(&self, execute_id: i64) -> Result<Vec<NodeExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.execute_id == execute_id)
            .cloned()
            .collect())
    }

    async fn get_node_execution(
        &self,
        execute_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeExecution>> {
        let state = self.state.lock().await;
        let matching: Vec<&NodeExecution> = state
            .nodes
            .iter()
            .filter(|n| n.execute_id == execute_id && n.node_id == node_id)
            .collect();
        Ok(matching
            .iter()
            .find(|n| n.parent_node_id.is_none())
            .or(matching.first())
            .map(|n| (*n).clone()))
    }

    async fn get_node_execution_by_parent(
        &self,
        execute_id: i64,
        parent_node_id: &str,
    ) -> Result<Vec<NodeExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .nodes
            .iter()
            .filter(|n| {
                n.execute_id == execute_id && n.parent_node_id.as_deref() == Some(parent_node_id)
            })
            .cloned()
            .collect())
    }

    async fn set_test_run_latest_exe_id(
        &self,
        workflow_id: i64,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .test_run_latest
            .insert((workflow_id, user_id), execute_id);
        Ok(())
    }

    async fn get_test_run_latest_exe_id(
        &self,
        workflow_id: i64,
        user_id: i64,
    ) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state.test_run_latest.get(&(workflow_id, user_id)).copied())
    }

    async fn set_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .node_debug_latest
            .insert((workflow_id, node_id.to_string(), user_id), execute_id);
        Ok(())
    }

    async fn get_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
    ) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .node_debug_latest
            .get(&(workflow_id, node_id.to_string(), user_id))
            .copied())
    }
}

#[async_trait]
impl InterruptEventStore for MemoryStore {
    async fn save_interrupt_events(
        &self,
        execute_id: i64,
        events: &[InterruptEvent],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .interrupts
            .entry(execute_id)
            .or_default()
            .extend(events.iter().cloned());
        Ok(())
    }

    async fn get_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .interrupts
            .get(&execute_id)
            .and_then(|q| q.front())
            .cloned())
    }

    async fn update_first_interrupt_event(
        &self,
        execute_id: i64,
        event: &InterruptEvent,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        match state
            .interrupts
            .get_mut(&execute_id)
            .and_then(|q| q.front_mut())
        {
            Some(first) => {
                *first = event.clone();
                Ok(())
            }
            None => bail!("no interrupt event pending for execution {}", execute_id),
        }
    }

    async fn pop_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>> {
        let mut state = self.state.lock().await;
        Ok(state
            .interrupts
            .get_mut(&execute_id)
            .and_then(|q| q.pop_front()))
    }

    async fn remove_interrupt_events(&self, execute_id: i64, event_ids: &[i64]) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(queue) = state.interrupts.get_mut(&execute_id) {
            queue.retain(|e| !event_ids.contains(&e.id));
        }
        Ok(())
    }

    async fn list_interrupt_events(&self, execute_id: i64) -> Result<Vec<InterruptEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .interrupts
            .get(&execute_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CancelSignalStore for MemoryStore {
    async fn set_workflow_cancel_flag(&self, execute_id: i64) -> Result<()> {
        self.state.lock().await.cancel_flags.insert(execute_id);
        Ok(())
    }

    async fn get_workflow_cancel_flag(&self, execute_id: i64) -> Result<bool> {
        Ok(self.state.lock().await.cancel_flags.contains(&execute_id))
    }
}

/// Workflow definitions and connector releases kept in memory
///
/// Drafts are stored under an empty version. `LatestVersion` picks the
/// greatest version string among published ones. Commit ids are not tracked.
#[derive(Default)]
pub struct MemoryWorkflowRepository {
    workflows: Mutex<HashMap<(i64, String), Workflow>>,
    releases: Mutex<HashSet<(i64, i64, String)>>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workflow: Workflow) {
        self.workflows
            .lock()
            .await
            .insert((workflow.id, workflow.version.clone()), workflow);
    }

    /// Record that `version` was published to `connector_id`
    pub async fn publish_to_connector(&self, connector_id: i64, workflow_id: i64, version: &str) {
        self.releases
            .lock()
            .await
            .insert((connector_id, workflow_id, version.to_string()));
    }
}

#[async_trait]
impl WorkflowRepository for MemoryWorkflowRepository {
    async fn get_workflow(&self, policy: &GetPolicy) -> Result<Option<Workflow>> {
        let workflows = self.workflows.lock().await;
        let found = match policy.from {
            Locator::Draft => workflows.get(&(policy.id, String::new())),
            Locator::SpecificVersion => workflows.get(&(policy.id, policy.version.clone())),
            Locator::LatestVersion => workflows
                .iter()
                .filter(|((id, version), _)| *id == policy.id && !version.is_empty())
                .max_by(|a, b| a.0.1.cmp(&b.0.1))
                .map(|(_, wf)| wf),
        };

        Ok(found.cloned())
    }

    async fn is_application_connector_workflow_version(
        &self,
        connector_id: i64,
        workflow_id: i64,
        version: &str,
    ) -> Result<bool> {
        Ok(self
            .releases
            .lock()
            .await
            .contains(&(connector_id, workflow_id, version.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{InterruptEventType, NodeType, WorkflowMode};

    fn node(id: i64, exe: i64, node_id: &str, parent: Option<&str>, index: usize) -> NodeExecution {
        let row = NodeExecution::started(id, exe, node_id, node_id, NodeType::Llm);
        match parent {
            Some(p) => row.with_parent(p, index),
            None => row,
        }
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = MemoryStore::new();
        let mut exe = WorkflowExecution::running(1, 10, String::new(), 100);
        exe.status = WorkflowExecuteStatus::Interrupted;
        store.create_workflow_execution(&exe).await.unwrap();

        let update = ExecutionUpdate::status(1, WorkflowExecuteStatus::Cancel);
        let (rows, status) = store
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Running])
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(status, WorkflowExecuteStatus::Interrupted);

        let (rows, status) = store
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Interrupted])
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(status, WorkflowExecuteStatus::Cancel);

        let missing = ExecutionUpdate::status(2, WorkflowExecuteStatus::Cancel);
        assert!(
            store
                .update_workflow_execution(&missing, &[WorkflowExecuteStatus::Running])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_try_lock_only_from_interrupted() {
        let store = MemoryStore::new();
        let mut exe = WorkflowExecution::running(1, 10, String::new(), 100);
        exe.status = WorkflowExecuteStatus::Interrupted;
        store.create_workflow_execution(&exe).await.unwrap();

        let (locked, status) = store.try_lock_workflow_execution(1, 55).await.unwrap();
        assert!(locked);
        assert_eq!(status, WorkflowExecuteStatus::Running);

        let (locked, _) = store.try_lock_workflow_execution(1, 55).await.unwrap();
        assert!(!locked);

        let stored = store.get_workflow_execution(1).await.unwrap().unwrap();
        assert_eq!(stored.current_resuming_event_id, Some(55));
    }

    #[tokio::test]
    async fn test_node_rows_and_cancel() {
        let store = MemoryStore::new();
        store.create_node_execution(&node(1, 7, "batch", None, 0)).await.unwrap();
        store.create_node_execution(&node(2, 7, "inner", Some("batch"), 0)).await.unwrap();
        store.create_node_execution(&node(3, 7, "inner", Some("batch"), 1)).await.unwrap();
        store.create_node_execution(&node(4, 8, "other", None, 0)).await.unwrap();

        let mut done = node(3, 7, "inner", Some("batch"), 1);
        done.status = NodeExecuteStatus::Success;
        store.update_node_execution(&done).await.unwrap();

        assert_eq!(store.cancel_all_running_nodes(7).await.unwrap(), 2);
        let rows = store.get_node_executions_by_exe_id(7).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(rows[2].status, NodeExecuteStatus::Success);
        assert_eq!(rows[0].status, NodeExecuteStatus::Cancel);

        let children = store.get_node_execution_by_parent(7, "batch").await.unwrap();
        assert_eq!(children.len(), 2);

        let other = store.get_node_executions_by_exe_id(8).await.unwrap();
        assert_eq!(other[0].status, NodeExecuteStatus::Running);
    }

    #[tokio::test]
    async fn test_get_node_execution_prefers_top_level() {
        let store = MemoryStore::new();
        store.create_node_execution(&node(1, 7, "n", Some("loop"), 0)).await.unwrap();
        store.create_node_execution(&node(2, 7, "n", None, 0)).await.unwrap();
        let row = store.get_node_execution(7, "n").await.unwrap().unwrap();
        assert_eq!(row.id, 2);

        store.create_node_execution(&node(3, 9, "m", Some("loop"), 0)).await.unwrap();
        let row = store.get_node_execution(9, "m").await.unwrap().unwrap();
        assert_eq!(row.id, 3);
        assert!(store.get_node_execution(9, "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupt_queue_order() {
        let store = MemoryStore::new();
        let first = InterruptEvent::new(1, "n1", NodeType::QuestionAnswer, InterruptEventType::Question, "{}");
        let second = InterruptEvent::new(2, "n2", NodeType::InputReceiver, InterruptEventType::InputReceiver, "{}");
        store
            .save_interrupt_events(5, &[first.clone(), second.clone()])
            .await
            .unwrap();

        assert_eq!(store.get_first_interrupt_event(5).await.unwrap(), Some(first.clone()));
        let updated = first.clone().with_title("Ask");
        store.update_first_interrupt_event(5, &updated).await.unwrap();
        assert_eq!(store.pop_first_interrupt_event(5).await.unwrap(), Some(updated));
        assert_eq!(store.list_interrupt_events(5).await.unwrap(), vec![second]);
        assert!(store.update_first_interrupt_event(6, &first).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_interrupt_events() {
        let store = MemoryStore::new();
        let events: Vec<_> = (1..=3)
            .map(|id| InterruptEvent::new(id, "n", NodeType::QuestionAnswer, InterruptEventType::Question, "{}"))
            .collect();
        store.save_interrupt_events(5, &events).await.unwrap();
        store.save_interrupt_events(6, &events[..1]).await.unwrap();

        store.remove_interrupt_events(5, &[1, 3]).await.unwrap();
        store.remove_interrupt_events(7, &[1]).await.unwrap();

        assert_eq!(store.list_interrupt_events(5).await.unwrap(), vec![events[1].clone()]);
        assert_eq!(store.list_interrupt_events(6).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_flag_and_latest_pointers() {
        let store = MemoryStore::new();
        assert!(!store.get_workflow_cancel_flag(1).await.unwrap());
        store.set_workflow_cancel_flag(1).await.unwrap();
        assert!(store.get_workflow_cancel_flag(1).await.unwrap());

        store.set_test_run_latest_exe_id(10, 3, 100).await.unwrap();
        store.set_test_run_latest_exe_id(10, 3, 101).await.unwrap();
        assert_eq!(store.get_test_run_latest_exe_id(10, 3).await.unwrap(), Some(101));
        assert_eq!(store.get_test_run_latest_exe_id(10, 4).await.unwrap(), None);

        store.set_node_debug_latest_exe_id(10, "n", 3, 200).await.unwrap();
        assert_eq!(
            store.get_node_debug_latest_exe_id(10, "n", 3).await.unwrap(),
            Some(200)
        );
    }

    #[tokio::test]
    async fn test_repository_locators() {
        let repo = MemoryWorkflowRepository::new();
        let draft = Workflow {
            id: 1,
            space_id: 2,
            app_id: None,
            version: String::new(),
            commit_id: "c1".into(),
            mode: WorkflowMode::Workflow,
            canvas: "{}".into(),
        };
        let mut v1 = draft.clone();
        v1.version = "v0.0.1".into();
        let mut v2 = draft.clone();
        v2.version = "v0.0.2".into();
        repo.insert(draft).await;
        repo.insert(v1).await;
        repo.insert(v2).await;

        let got = repo.get_workflow(&GetPolicy::new(1, Locator::Draft)).await.unwrap().unwrap();
        assert_eq!(got.version, "");
        let got = repo
            .get_workflow(&GetPolicy::new(1, Locator::SpecificVersion).with_version("v0.0.1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version, "v0.0.1");
        let got = repo
            .get_workflow(&GetPolicy::new(1, Locator::LatestVersion))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.version, "v0.0.2");
        assert!(repo.get_workflow(&GetPolicy::new(9, Locator::Draft)).await.unwrap().is_none());

        repo.publish_to_connector(1024, 1, "v0.0.1").await;
        assert!(repo.is_application_connector_workflow_version(1024, 1, "v0.0.1").await.unwrap());
        assert!(!repo.is_application_connector_workflow_version(1024, 1, "v0.0.2").await.unwrap());
    }
}
