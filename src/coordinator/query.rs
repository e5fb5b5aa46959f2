//! Read-side views of executions

use super::ExecutionCoordinator;
use super::merge::merge_composite_inner_nodes;
use crate::entity::{
    ENTRY_NODE_KEY, ExecuteMode, ExecutionRef, NodeExecution, NodeType, WorkflowExecuteStatus,
    WorkflowExecution, is_generated_node_for_batch_mode,
};
use crate::error::{OrchestratorError, Result};
use anyhow::Context;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error};

impl ExecutionCoordinator {
    /// Current view of an execution
    ///
    /// An execution whose row is not written yet reads as Running. The oldest
    /// interrupt event is shown only while the execution is interrupted or
    /// while that event is the one being resumed.
    pub async fn get_execution(
        &self,
        reference: &ExecutionRef,
        include_nodes: bool,
    ) -> Result<WorkflowExecution> {
        let history = &self.stores.history;
        let Some(mut execution) = history.get_workflow_execution(reference.id).await? else {
            debug!(execute_id = reference.id, "execution not recorded yet");
            let mut placeholder = WorkflowExecution::running(
                reference.id,
                reference.workflow_id,
                reference.version.clone(),
                0,
            );
            placeholder.root_execution_id = reference.root_execution_id;
            return Ok(placeholder);
        };

        let first_event = self
            .stores
            .interrupts
            .get_first_interrupt_event(reference.id)
            .await
            .context("failed to find interrupt events")?;
        if let Some(event) = first_event {
            if execution.status == WorkflowExecuteStatus::Interrupted
                || execution.current_resuming_event_id == Some(event.id)
            {
                execution.interrupt_events = vec![event];
            }
        }

        if !include_nodes {
            return Ok(execution);
        }

        let nodes = history
            .get_node_executions_by_exe_id(reference.id)
            .await
            .context("failed to find node executions")?;
        let node_ids: HashSet<String> = nodes.iter().map(|n| n.node_id.clone()).collect();

        let mut groups: BTreeMap<String, BTreeMap<usize, NodeExecution>> = BTreeMap::new();
        for node in nodes {
            let nested = node
                .parent_node_id
                .as_ref()
                .is_some_and(|parent| node_ids.contains(parent));
            if nested {
                groups
                    .entry(node.node_id.clone())
                    .or_default()
                    .insert(node.index, node);
            } else {
                execution.node_executions.push(node);
            }
        }

        for (_, rows) in groups {
            let max_index = rows.keys().next_back().copied().unwrap_or_default();
            if let Some(merged) = merge_composite_inner_nodes(rows, max_index) {
                execution.node_executions.push(merged);
            }
        }

        Ok(execution)
    }

    /// A node's row, plus its merged iterations when a node-debug run
    /// executed it in batch mode
    pub async fn get_node_execution(
        &self,
        execute_id: i64,
        node_id: &str,
    ) -> Result<(NodeExecution, Option<NodeExecution>)> {
        let history = &self.stores.history;
        let node = history
            .get_node_execution(execute_id, node_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                what: "node execution",
                id: format!("{}/{}", execute_id, node_id),
            })?;

        if node.node_type != NodeType::Batch {
            return Ok((node, None));
        }

        let execution = history
            .get_workflow_execution(execute_id)
            .await?
            .ok_or_else(|| OrchestratorError::execution_not_found(execute_id))?;
        if execution.execute_config.mode != ExecuteMode::NodeDebug {
            return Ok((node, None));
        }

        let inner = history
            .get_node_execution_by_parent(execute_id, &node.node_id)
            .await?;
        // A regular batch node has its own inner nodes; only generated ones are merged
        if inner
            .iter()
            .any(|n| !is_generated_node_for_batch_mode(&n.node_id, &node.node_id))
        {
            return Ok((node, None));
        }

        let max_index = inner.iter().map(|n| n.index).max().unwrap_or_default();
        let rows: BTreeMap<usize, NodeExecution> =
            inner.into_iter().map(|n| (n.index, n)).collect();
        let merged = merge_composite_inner_nodes(rows, max_index);
        Ok((node, merged))
    }

    /// Entry node of the user's latest test run of a workflow
    pub async fn get_latest_test_run_input(
        &self,
        workflow_id: i64,
        user_id: i64,
    ) -> Option<NodeExecution> {
        let execute_id = match self
            .stores
            .history
            .get_test_run_latest_exe_id(workflow_id, user_id)
            .await
        {
            Ok(Some(id)) if id != 0 => id,
            Ok(_) => return None,
            Err(e) => {
                error!(workflow_id, error = %e, "failed to read latest test run");
                return None;
            }
        };

        match self.get_node_execution(execute_id, ENTRY_NODE_KEY).await {
            Ok((node, _)) => Some(node),
            Err(e) => {
                error!(execute_id, error = %e, "failed to get latest test run input");
                None
            }
        }
    }

    /// The user's latest debug run of a single node
    pub async fn get_latest_node_debug_input(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
    ) -> Option<(NodeExecution, Option<NodeExecution>)> {
        let execute_id = match self
            .stores
            .history
            .get_node_debug_latest_exe_id(workflow_id, node_id, user_id)
            .await
        {
            Ok(Some(id)) if id != 0 => id,
            Ok(_) => return None,
            Err(e) => {
                error!(workflow_id, node_id, error = %e, "failed to read latest node debug run");
                return None;
            }
        };

        match self.get_node_execution(execute_id, node_id).await {
            Ok(found) => Some(found),
            Err(e) => {
                error!(execute_id, node_id, error = %e, "failed to get latest node debug input");
                None
            }
        }
    }
}
