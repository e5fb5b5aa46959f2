//! Cancelling runs

use super::ExecutionCoordinator;
use crate::entity::{ExecutionUpdate, WorkflowExecuteStatus};
use crate::error::{OrchestratorError, Result};
use anyhow::Context;
use tracing::{debug, info};

impl ExecutionCoordinator {
    /// Cancel a running or interrupted root execution
    ///
    /// An interrupted execution is moved to Cancel right away. A running one
    /// keeps its status; its own completion records the cancel once it sees
    /// the flag. Cancelling an execution that already finished is a no-op.
    pub async fn cancel(&self, execute_id: i64, workflow_id: i64, space_id: i64) -> Result<()> {
        let history = &self.stores.history;
        let execution = history
            .get_workflow_execution(execute_id)
            .await?
            .ok_or_else(|| OrchestratorError::execution_not_found(execute_id))?;

        if execution.workflow_id != workflow_id || execution.space_id != space_id {
            return Err(OrchestratorError::invalid_state(format!(
                "workflow execution id mismatch, execute_id: {}, workflow_id: {}, space_id: {}",
                execute_id, workflow_id, space_id
            )));
        }

        if execution.status.is_terminal() {
            debug!(execute_id, status = %execution.status, "execution already finished, nothing to cancel");
            return Ok(());
        }

        if !execution.is_root() {
            return Err(OrchestratorError::invalid_state(
                "can only cancel a root execution",
            ));
        }

        let update = ExecutionUpdate::status(execute_id, WorkflowExecuteStatus::Cancel);
        let (updated, current) = history
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Interrupted])
            .await
            .context("failed to cancel interrupted workflow execution")?;

        if updated == 0 {
            if current != WorkflowExecuteStatus::Running {
                history.cancel_all_running_nodes(execute_id).await?;
                return Ok(());
            }
            debug!(execute_id, "execution is running, its completion will record the cancel");
        } else {
            history
                .cancel_all_running_nodes(execute_id)
                .await
                .context("failed to cancel running nodes")?;
            info!(execute_id, "interrupted execution cancelled");
        }

        self.stores
            .cancel_signals
            .set_workflow_cancel_flag(execute_id)
            .await?;
        Ok(())
    }
}
