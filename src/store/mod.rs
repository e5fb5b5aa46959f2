//! Store interfaces the orchestrator persists through
//!
//! The traits here are the only way the orchestrator touches durable state:
//! - [`ExecutionHistoryStore`] - workflow and node execution rows, "latest run" pointers
//! - [`InterruptEventStore`] - pending interrupt events per execution
//! - [`CancelSignalStore`] - cooperative cancel flag per execution
//! - [`WorkflowRepository`] - workflow definitions and release lookups
//!
//! [`MemoryStore`] and [`SqliteStore`] implement the first three.

mod id;
mod memory;
mod sqlite;

pub use id::{IdGenerator, SnowflakeIdGenerator};
pub use memory::{MemoryStore, MemoryWorkflowRepository};
pub use sqlite::SqliteStore;

use crate::entity::{
    ExecutionUpdate, GetPolicy, InterruptEvent, NodeExecution, Workflow, WorkflowExecuteStatus,
    WorkflowExecution,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable record of workflow- and node-level execution state
#[async_trait]
pub trait ExecutionHistoryStore: Send + Sync {
    async fn create_workflow_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Apply `update` only if the persisted status is in `allowed`.
    ///
    /// Returns the number of rows changed and the status persisted after the call.
    async fn update_workflow_execution(
        &self,
        update: &ExecutionUpdate,
        allowed: &[WorkflowExecuteStatus],
    ) -> Result<(u64, WorkflowExecuteStatus)>;

    /// Move an Interrupted execution to Running and mark the event being resumed
    async fn try_lock_workflow_execution(
        &self,
        id: i64,
        resuming_event_id: i64,
    ) -> Result<(bool, WorkflowExecuteStatus)>;

    async fn get_workflow_execution(&self, id: i64) -> Result<Option<WorkflowExecution>>;

    async fn create_node_execution(&self, execution: &NodeExecution) -> Result<()>;

    async fn update_node_execution(&self, execution: &NodeExecution) -> Result<()>;

    /// Force every Running node row of an execution to Cancel
    async fn cancel_all_running_nodes(&self, execute_id: i64) -> Result<u64>;

    /// All node rows of an execution in creation order
    async fn get_node_executions_by_exe_id(&self, execute_id: i64) -> Result<Vec<NodeExecution>>;

    /// The top-level row for a node, falling back to its first nested row
    async fn get_node_execution(
        &self,
        execute_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeExecution>>;

    async fn get_node_execution_by_parent(
        &self,
        execute_id: i64,
        parent_node_id: &str,
    ) -> Result<Vec<NodeExecution>>;

    async fn set_test_run_latest_exe_id(
        &self,
        workflow_id: i64,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()>;

    async fn get_test_run_latest_exe_id(&self, workflow_id: i64, user_id: i64)
    -> Result<Option<i64>>;

    async fn set_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()>;

    async fn get_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
    ) -> Result<Option<i64>>;
}

/// Durable record of interrupt events, oldest first
#[async_trait]
pub trait InterruptEventStore: Send + Sync {
    async fn save_interrupt_events(&self, execute_id: i64, events: &[InterruptEvent])
    -> Result<()>;

    async fn get_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>>;

    async fn update_first_interrupt_event(
        &self,
        execute_id: i64,
        event: &InterruptEvent,
    ) -> Result<()>;

    async fn pop_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>>;

    /// Drop the given events from the queue, leaving the rest in order
    async fn remove_interrupt_events(&self, execute_id: i64, event_ids: &[i64]) -> Result<()>;

    async fn list_interrupt_events(&self, execute_id: i64) -> Result<Vec<InterruptEvent>>;
}

/// Cooperative cancellation flag keyed by execution
#[async_trait]
pub trait CancelSignalStore: Send + Sync {
    async fn set_workflow_cancel_flag(&self, execute_id: i64) -> Result<()>;

    async fn get_workflow_cancel_flag(&self, execute_id: i64) -> Result<bool>;
}

/// Workflow definition lookups
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_workflow(&self, policy: &GetPolicy) -> Result<Option<Workflow>>;

    /// Whether `version` of the workflow was published to the connector
    async fn is_application_connector_workflow_version(
        &self,
        connector_id: i64,
        workflow_id: i64,
        version: &str,
    ) -> Result<bool>;
}

/// The three execution stores, shared by the runner and the coordinator
#[derive(Clone)]
pub struct Stores {
    pub history: Arc<dyn ExecutionHistoryStore>,
    pub interrupts: Arc<dyn InterruptEventStore>,
    pub cancel_signals: Arc<dyn CancelSignalStore>,
}

impl Stores {
    pub fn new(
        history: Arc<dyn ExecutionHistoryStore>,
        interrupts: Arc<dyn InterruptEventStore>,
        cancel_signals: Arc<dyn CancelSignalStore>,
    ) -> Self {
        Self {
            history,
            interrupts,
            cancel_signals,
        }
    }

    /// Use one backend for all three stores
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ExecutionHistoryStore + InterruptEventStore + CancelSignalStore + 'static,
    {
        Self {
            history: backend.clone(),
            interrupts: backend.clone(),
            cancel_signals: backend,
        }
    }
}
