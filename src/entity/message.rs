//! Messages emitted on an execution stream

use super::{TokenUsage, WorkflowExecuteStatus};
use serde::{Deserialize, Serialize};

/// What a stream message carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Workflow-level state change
    State {
        status: WorkflowExecuteStatus,
        usage: Option<TokenUsage>,
    },
    /// Incremental output of a node
    Data {
        node_id: String,
        node_title: String,
        content: String,
        last: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub execute_id: i64,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    pub fn state(execute_id: i64, status: WorkflowExecuteStatus, usage: Option<TokenUsage>) -> Self {
        Self {
            execute_id,
            kind: MessageKind::State { status, usage },
        }
    }

    pub fn data(
        execute_id: i64,
        node_id: impl Into<String>,
        node_title: impl Into<String>,
        content: impl Into<String>,
        last: bool,
    ) -> Self {
        Self {
            execute_id,
            kind: MessageKind::Data {
                node_id: node_id.into(),
                node_title: node_title.into(),
                content: content.into(),
                last,
            },
        }
    }

    /// Terminal state message
    pub fn is_final(&self) -> bool {
        matches!(&self.kind, MessageKind::State { status, .. } if *status != WorkflowExecuteStatus::Running)
    }
}
