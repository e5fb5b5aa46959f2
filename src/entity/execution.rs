//! Workflow-level execution records and terminal outcomes

use super::{ExecuteConfig, InterruptEvent, NodeExecution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Persisted status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecuteStatus {
    Running,
    Success,
    Failed,
    Cancel,
    Interrupted,
}

impl WorkflowExecuteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancel => "cancel",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancel" => Some(Self::Cancel),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }

    /// Running and Interrupted executions can still change state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running | Self::Interrupted)
    }
}

impl fmt::Display for WorkflowExecuteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage summed over model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// How the output of a finished run should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatePlan {
    /// Output is the whole variable map of the exit node
    ReturnVariables,
    /// Output is the answer string in the `output` field
    UseAnswerContent,
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: i64,
    pub workflow_id: i64,
    pub version: String,
    pub space_id: i64,
    pub execute_config: ExecuteConfig,
    pub status: WorkflowExecuteStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub input: Option<String>,
    pub output: Option<String>,
    pub error_code: Option<String>,
    pub fail_reason: Option<String>,
    pub token_info: Option<TokenUsage>,
    pub node_count: u32,

    /// Equals `id` unless this is a sub-execution
    pub root_execution_id: i64,

    /// Composite node that spawned this sub-execution
    pub parent_node_id: Option<String>,

    /// Interrupt event being resumed right now, if any
    pub current_resuming_event_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interrupt_events: Vec<InterruptEvent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_executions: Vec<NodeExecution>,
}

impl WorkflowExecution {
    /// A fresh Running execution rooted at itself
    pub fn running(id: i64, workflow_id: i64, version: String, space_id: i64) -> Self {
        Self {
            id,
            workflow_id,
            version,
            space_id,
            execute_config: ExecuteConfig::default(),
            status: WorkflowExecuteStatus::Running,
            created_at: Utc::now(),
            updated_at: None,
            duration: Duration::ZERO,
            input: None,
            output: None,
            error_code: None,
            fail_reason: None,
            token_info: None,
            node_count: 0,
            root_execution_id: id,
            parent_node_id: None,
            current_resuming_event_id: None,
            interrupt_events: Vec::new(),
            node_executions: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == self.root_execution_id
    }

    /// Overwrite status and every field the update carries
    pub fn apply(&mut self, update: &ExecutionUpdate) {
        self.status = update.status;
        self.updated_at = Some(update.updated_at);
        if let Some(duration) = update.duration {
            self.duration = duration;
        }
        if let Some(output) = &update.output {
            self.output = Some(output.clone());
        }
        if let Some(code) = &update.error_code {
            self.error_code = Some(code.clone());
        }
        if let Some(reason) = &update.fail_reason {
            self.fail_reason = Some(reason.clone());
        }
        if let Some(usage) = update.token_info {
            self.token_info = Some(usage);
        }
    }
}

/// Identity of an execution as known to a caller that may be ahead of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRef {
    pub id: i64,
    pub workflow_id: i64,
    pub version: String,
    pub root_execution_id: i64,
}

impl ExecutionRef {
    pub fn new(id: i64, workflow_id: i64) -> Self {
        Self {
            id,
            workflow_id,
            version: String::new(),
            root_execution_id: id,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

impl From<&WorkflowExecution> for ExecutionRef {
    fn from(exe: &WorkflowExecution) -> Self {
        Self {
            id: exe.id,
            workflow_id: exe.workflow_id,
            version: exe.version.clone(),
            root_execution_id: exe.root_execution_id,
        }
    }
}

/// Partial update applied by a conditional status write
#[derive(Debug, Clone)]
pub struct ExecutionUpdate {
    pub id: i64,
    pub status: WorkflowExecuteStatus,
    pub duration: Option<Duration>,
    pub output: Option<String>,
    pub error_code: Option<String>,
    pub fail_reason: Option<String>,
    pub token_info: Option<TokenUsage>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionUpdate {
    pub fn status(id: i64, status: WorkflowExecuteStatus) -> Self {
        Self {
            id,
            status,
            duration: None,
            output: None,
            error_code: None,
            fail_reason: None,
            token_info: None,
            updated_at: Utc::now(),
        }
    }
}

/// Kind of the single terminal event a run delivers
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalKind {
    Success,
    Interrupted { events: Vec<InterruptEvent> },
    Failed { reason: String },
    Cancelled,
}

impl TerminalKind {
    pub fn status(&self) -> WorkflowExecuteStatus {
        match self {
            Self::Success => WorkflowExecuteStatus::Success,
            Self::Interrupted { .. } => WorkflowExecuteStatus::Interrupted,
            Self::Failed { .. } => WorkflowExecuteStatus::Failed,
            Self::Cancelled => WorkflowExecuteStatus::Cancel,
        }
    }
}

/// Final outcome of a run, sent once after all state is recorded
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    pub execute_id: i64,
    pub kind: TerminalKind,
    pub duration: Duration,
    pub token_usage: TokenUsage,
}

impl TerminalEvent {
    pub fn fail_reason(&self) -> Option<String> {
        match &self.kind {
            TerminalKind::Failed { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn interrupt_events(&self) -> Vec<InterruptEvent> {
        match &self.kind {
            TerminalKind::Interrupted { events } => events.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in [
            WorkflowExecuteStatus::Running,
            WorkflowExecuteStatus::Success,
            WorkflowExecuteStatus::Failed,
            WorkflowExecuteStatus::Cancel,
            WorkflowExecuteStatus::Interrupted,
        ] {
            assert_eq!(WorkflowExecuteStatus::parse(status.as_str()), Some(status));
        }

        assert!(!WorkflowExecuteStatus::Running.is_terminal());
        assert!(!WorkflowExecuteStatus::Interrupted.is_terminal());
        assert!(WorkflowExecuteStatus::Cancel.is_terminal());
        assert!(WorkflowExecuteStatus::parse("paused").is_none());
    }

    #[test]
    fn test_running_execution_is_root() {
        let exe = WorkflowExecution::running(42, 7, String::new(), 1);
        assert!(exe.is_root());
        assert_eq!(exe.status, WorkflowExecuteStatus::Running);

        let mut child = WorkflowExecution::running(43, 7, String::new(), 1);
        child.root_execution_id = 42;
        assert!(!child.is_root());
    }

    #[test]
    fn test_terminal_kind_maps_status() {
        assert_eq!(TerminalKind::Success.status(), WorkflowExecuteStatus::Success);
        assert_eq!(
            TerminalKind::Interrupted { events: vec![] }.status(),
            WorkflowExecuteStatus::Interrupted
        );
        assert_eq!(
            TerminalKind::Failed {
                reason: "boom".into()
            }
            .status(),
            WorkflowExecuteStatus::Failed
        );
        assert_eq!(TerminalKind::Cancelled.status(), WorkflowExecuteStatus::Cancel);
    }
}
