//! Interrupt events and resume requests

use super::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a run suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptEventType {
    /// A question node waits for an answer
    Question,
    /// An input node waits for user-provided fields
    InputReceiver,
    /// A plugin waits for OAuth authorization
    OAuthPlugin,
    /// A local plugin waits for the client to run it
    LocalPlugin,
    /// A workflow used as a tool waits on its own interrupt
    WorkflowCalled,
}

impl InterruptEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::InputReceiver => "input_receiver",
            Self::OAuthPlugin => "o_auth_plugin",
            Self::LocalPlugin => "local_plugin",
            Self::WorkflowCalled => "workflow_called",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "question" => Some(Self::Question),
            "input_receiver" => Some(Self::InputReceiver),
            "o_auth_plugin" => Some(Self::OAuthPlugin),
            "local_plugin" => Some(Self::LocalPlugin),
            "workflow_called" => Some(Self::WorkflowCalled),
            _ => None,
        }
    }
}

/// A suspension point raised by the graph engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptEvent {
    pub id: i64,
    pub node_key: String,
    pub node_title: String,
    pub node_type: NodeType,
    pub event_type: InterruptEventType,

    /// Payload describing what resume data is expected
    pub interrupt_data: String,

    pub created_at: DateTime<Utc>,
}

impl InterruptEvent {
    pub fn new(
        id: i64,
        node_key: impl Into<String>,
        node_type: NodeType,
        event_type: InterruptEventType,
        interrupt_data: impl Into<String>,
    ) -> Self {
        Self {
            id,
            node_key: node_key.into(),
            node_title: String::new(),
            node_type,
            event_type,
            interrupt_data: interrupt_data.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.node_title = title.into();
        self
    }
}

/// Caller-supplied data to unblock an interrupt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub execute_id: i64,

    /// Event being answered; 0 means the first pending event
    #[serde(default)]
    pub event_id: i64,

    pub resume_data: String,
}

impl ResumeRequest {
    pub fn new(execute_id: i64, event_id: i64, resume_data: impl Into<String>) -> Self {
        Self {
            execute_id,
            event_id,
            resume_data: resume_data.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names_match_serde() {
        for t in [
            InterruptEventType::Question,
            InterruptEventType::InputReceiver,
            InterruptEventType::OAuthPlugin,
            InterruptEventType::LocalPlugin,
            InterruptEventType::WorkflowCalled,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(InterruptEventType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_resume_request_defaults_to_first_event() {
        let req: ResumeRequest =
            serde_json::from_str(r#"{"execute_id": 9, "resume_data": "yes"}"#).unwrap();
        assert_eq!(req, ResumeRequest::new(9, 0, "yes"));
    }
}
