//! Error types for the orchestrator

use crate::convert::ConversionError;
use crate::engine::EngineError;
use crate::entity::WorkflowExecuteStatus;
use thiserror::Error;

/// Errors surfaced by [`ExecutionCoordinator`](crate::coordinator::ExecutionCoordinator)
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Execution, workflow or node lookup missed
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Operation not allowed in the current state
    #[error("invalid state: {message}")]
    InvalidState { message: String },

    /// Release run of an app workflow that was never published for the connector
    #[error(
        "application {app_id} workflow {workflow_id} connector {connector_id} does not have version {version}"
    )]
    VersionNotFound {
        app_id: i64,
        workflow_id: i64,
        connector_id: i64,
        version: String,
    },

    /// Canvas or schema could not be turned into a graph
    #[error("{stage}: {source}")]
    Compile {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("input conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// Graph run failed for a reason other than an interrupt
    #[error(
        "workflow execution failed (execute_id={execute_id}, space_id={space_id}, workflow_id={workflow_id}): {source}"
    )]
    Execute {
        execute_id: i64,
        space_id: i64,
        workflow_id: i64,
        #[source]
        source: EngineError,
    },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A collaborator needed by this operation was not attached
    #[error("no {0} configured")]
    Unconfigured(&'static str),

    #[error("execution stream closed")]
    StreamClosed,

    /// The run ended without delivering its terminal event
    #[error("run {execute_id} ended without a terminal event")]
    TerminalEventLost { execute_id: i64 },
}

impl OrchestratorError {
    pub fn execution_not_found(id: i64) -> Self {
        Self::NotFound {
            what: "workflow execution",
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn not_interrupted(id: i64, status: WorkflowExecuteStatus) -> Self {
        Self::invalid_state(format!(
            "workflow execution {} is not interrupted, status is {}, cannot resume",
            id, status
        ))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::execution_not_found(12);
        assert_eq!(err.to_string(), "workflow execution not found: 12");
        assert!(err.is_not_found());

        let err = OrchestratorError::not_interrupted(12, WorkflowExecuteStatus::Success);
        assert!(err.to_string().contains("status is success"));
        assert!(err.is_invalid_state());

        let err = OrchestratorError::VersionNotFound {
            app_id: 1,
            workflow_id: 2,
            connector_id: 3,
            version: "v0.0.1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("connector 3"));
        assert!(msg.contains("v0.0.1"));
    }

    #[test]
    fn test_execute_error_carries_ids() {
        let err = OrchestratorError::Execute {
            execute_id: 100,
            space_id: 200,
            workflow_id: 300,
            source: EngineError::run("node 'llm' timed out"),
        };
        let msg = err.to_string();
        assert!(msg.contains("execute_id=100"));
        assert!(msg.contains("space_id=200"));
        assert!(msg.contains("workflow_id=300"));
        assert!(msg.contains("timed out"));
    }
}
