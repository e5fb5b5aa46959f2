//! Node-level execution records

use super::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Node key of the entry node every workflow starts from
pub const ENTRY_NODE_KEY: &str = "100001";

/// Status of one node invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecuteStatus {
    Waiting,
    Running,
    Success,
    Failed,
    Cancel,
}

impl NodeExecuteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for NodeExecuteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node type as reported by the graph engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Entry,
    Exit,
    Llm,
    Code,
    Plugin,
    SubWorkflow,
    Batch,
    Loop,
    Selector,
    InputReceiver,
    QuestionAnswer,
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Entry => "Entry",
            Self::Exit => "Exit",
            Self::Llm => "LLM",
            Self::Code => "CodeRunner",
            Self::Plugin => "Plugin",
            Self::SubWorkflow => "SubWorkflow",
            Self::Batch => "Batch",
            Self::Loop => "Loop",
            Self::Selector => "Selector",
            Self::InputReceiver => "InputReceiver",
            Self::QuestionAnswer => "QuestionAnswer",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Entry" => Self::Entry,
            "Exit" => Self::Exit,
            "LLM" => Self::Llm,
            "CodeRunner" => Self::Code,
            "Plugin" => Self::Plugin,
            "SubWorkflow" => Self::SubWorkflow,
            "Batch" => Self::Batch,
            "Loop" => Self::Loop,
            "Selector" => Self::Selector,
            "InputReceiver" => Self::InputReceiver,
            "QuestionAnswer" => Self::QuestionAnswer,
            _ => Self::Other(s),
        }
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of one graph node within an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: i64,
    pub execute_id: i64,
    pub node_id: String,
    pub node_name: String,
    pub node_type: NodeType,
    pub status: NodeExecuteStatus,
    pub duration: Duration,
    pub input: Option<String>,
    pub output: Option<String>,
    pub error_info: Option<String>,
    pub token_info: Option<TokenUsage>,

    /// Set when nested inside a composite node
    pub parent_node_id: Option<String>,

    /// Position within a batch
    pub index: usize,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Per-iteration rows of a merged composite node, holes for missing indices
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexed_executions: Vec<Option<NodeExecution>>,
}

impl NodeExecution {
    /// A Running row for a node that just started
    pub fn started(
        id: i64,
        execute_id: i64,
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        node_type: NodeType,
    ) -> Self {
        Self {
            id,
            execute_id,
            node_id: node_id.into(),
            node_name: node_name.into(),
            node_type,
            status: NodeExecuteStatus::Running,
            duration: Duration::ZERO,
            input: None,
            output: None,
            error_info: None,
            token_info: None,
            parent_node_id: None,
            index: 0,
            created_at: Utc::now(),
            updated_at: None,
            indexed_executions: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_node_id: impl Into<String>, index: usize) -> Self {
        self.parent_node_id = Some(parent_node_id.into());
        self.index = index;
        self
    }
}

/// Key of the inner node generated when a single node runs in batch mode
pub fn generated_node_for_batch_mode(key: &str) -> String {
    format!("{}_inner", key)
}

pub fn is_generated_node_for_batch_mode(key: &str, parent_key: &str) -> bool {
    key == generated_node_for_batch_mode(parent_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_string_roundtrip() {
        assert_eq!(NodeType::from("Batch".to_string()), NodeType::Batch);
        assert_eq!(NodeType::from("LLM".to_string()), NodeType::Llm);
        assert_eq!(
            NodeType::from("Variable".to_string()),
            NodeType::Other("Variable".into())
        );
        assert_eq!(String::from(NodeType::Code), "CodeRunner");
    }

    #[test]
    fn test_node_type_serde() {
        let json = serde_json::to_string(&NodeType::Batch).unwrap();
        assert_eq!(json, "\"Batch\"");
        let parsed: NodeType = serde_json::from_str("\"Custom\"").unwrap();
        assert_eq!(parsed, NodeType::Other("Custom".into()));
    }

    #[test]
    fn test_generated_batch_node_naming() {
        assert_eq!(generated_node_for_batch_mode("1234"), "1234_inner");
        assert!(is_generated_node_for_batch_mode("1234_inner", "1234"));
        assert!(!is_generated_node_for_batch_mode("5678", "1234"));
        assert!(!is_generated_node_for_batch_mode("1234_inner", "123"));
    }
}
