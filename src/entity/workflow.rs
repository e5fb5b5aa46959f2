//! Workflow definitions as seen by the orchestrator

use super::{Locator, WorkflowMode};
use serde::{Deserialize, Serialize};

/// A stored workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub space_id: i64,
    pub app_id: Option<i64>,

    /// Empty for a draft
    pub version: String,
    pub commit_id: String,
    pub mode: WorkflowMode,

    /// Canvas JSON as saved by the editor
    pub canvas: String,
}

impl Workflow {
    pub fn basic(&self) -> WorkflowBasic {
        WorkflowBasic {
            id: self.id,
            space_id: self.space_id,
            app_id: self.app_id,
            version: self.version.clone(),
            commit_id: self.commit_id.clone(),
        }
    }
}

/// Identity of the definition a run was started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowBasic {
    pub id: i64,
    pub space_id: i64,
    pub app_id: Option<i64>,
    pub version: String,
    pub commit_id: String,
}

/// Lookup policy for a workflow definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPolicy {
    pub id: i64,
    pub from: Locator,
    pub version: String,
    pub commit_id: String,
}

impl GetPolicy {
    pub fn new(id: i64, from: Locator) -> Self {
        Self {
            id,
            from,
            version: String::new(),
            commit_id: String::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = commit_id.into();
        self
    }
}
