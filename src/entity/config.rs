//! Per-run execution configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution mode of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMode {
    /// Test run from the editor
    #[default]
    Debug,
    /// Published workflow invoked through a connector
    Release,
    /// Single node (and its dependencies) run from the editor
    NodeDebug,
}

/// Which version of a workflow definition to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    #[default]
    Draft,
    SpecificVersion,
    LatestVersion,
}

/// How the caller consumes the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPattern {
    #[default]
    Sync,
    Async,
    Stream,
}

/// Topology mode of a workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    #[default]
    Workflow,
    ChatFlow,
}

/// An uploaded file referenced by an input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_url: String,
    pub file_name: String,
    pub file_extension: String,
}

impl FileInfo {
    pub fn new(file_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let file_extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        Self {
            file_url: file_url.into(),
            file_name,
            file_extension,
        }
    }
}

/// Chat message as stored by the conversation domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WfMessage {
    pub id: i64,
    pub run_id: i64,
    pub role: String,
    pub content: String,
}

/// Chat message in the shape model nodes consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMessage {
    pub role: String,
    pub content: String,
}

/// Configuration bag for one run; built by the caller, enriched during execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteConfig {
    /// Workflow id
    pub id: i64,
    pub from: Locator,
    pub version: String,
    pub commit_id: String,
    pub operator: i64,
    pub mode: ExecuteMode,
    pub app_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub connector_id: i64,
    pub sync_pattern: SyncPattern,

    /// Reject inputs that do not match the declared shape instead of warning
    #[serde(default)]
    pub input_fail_fast: bool,

    pub conversation_id: Option<i64>,
    pub section_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<WfMessage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history_schema_messages: Vec<SchemaMessage>,

    /// Uploaded files keyed by URL
    #[serde(default)]
    pub input_file_fields: HashMap<String, FileInfo>,

    #[serde(default)]
    pub workflow_mode: WorkflowMode,
}

impl ExecuteConfig {
    pub fn new(workflow_id: i64, from: Locator, mode: ExecuteMode, operator: i64) -> Self {
        Self {
            id: workflow_id,
            from,
            mode,
            operator,
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_app(mut self, app_id: i64) -> Self {
        self.app_id = Some(app_id);
        self
    }

    pub fn with_agent(mut self, agent_id: i64) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_connector(mut self, connector_id: i64) -> Self {
        self.connector_id = connector_id;
        self
    }

    pub fn with_conversation(mut self, conversation_id: i64, section_id: i64) -> Self {
        self.conversation_id = Some(conversation_id);
        self.section_id = Some(section_id);
        self
    }

    /// App id if set, otherwise agent id
    pub fn biz_id(&self) -> Option<i64> {
        self.app_id.or(self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_extension() {
        let info = FileInfo::new("https://cdn/x/report.PDF", "report.PDF");
        assert_eq!(info.file_extension, "pdf");

        let info = FileInfo::new("https://cdn/x/blob", "blob");
        assert_eq!(info.file_extension, "");
    }

    #[test]
    fn test_biz_id_prefers_app() {
        let config = ExecuteConfig::new(1, Locator::Draft, ExecuteMode::Debug, 9)
            .with_agent(20)
            .with_app(10);
        assert_eq!(config.biz_id(), Some(10));

        let config = ExecuteConfig::new(1, Locator::Draft, ExecuteMode::Debug, 9).with_agent(20);
        assert_eq!(config.biz_id(), Some(20));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = ExecuteConfig::new(5, Locator::SpecificVersion, ExecuteMode::Release, 3)
            .with_version("v1.0.0")
            .with_connector(1024);
        let json = serde_json::to_string(&config).unwrap();
        let back: ExecuteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
