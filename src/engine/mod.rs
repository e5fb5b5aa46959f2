//! Graph engine interface
//!
//! The orchestrator never schedules nodes itself. It turns a stored canvas
//! into a [`WorkflowSchema`], compiles that into a [`Graph`] and runs it,
//! handing the graph a [`RunContext`] through which node progress, stream
//! output and the terminal outcome are reported.

mod types;

pub use types::{EngineError, FieldKind, InputField, Variables};

use crate::entity::{FileInfo, TerminatePlan};
use crate::runner::RunContext;
use async_trait::async_trait;
use std::sync::Arc;

/// A workflow schema produced from a canvas
pub trait WorkflowSchema: Send + Sync {
    fn node_count(&self) -> u32;

    /// Chat rounds the schema's nodes read from history; 0 when none
    fn history_rounds(&self) -> u32;

    /// Files referenced by node inputs at design time
    fn input_file_fields(&self) -> Vec<FileInfo>;
}

/// Options applied when compiling a schema into a graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub graph_name: String,

    /// Reject schemas with more nodes than this
    pub max_node_count: Option<u32>,
}

impl CompileOptions {
    pub fn named(graph_name: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            max_node_count: None,
        }
    }

    /// Apply a node limit; 0 means unlimited
    pub fn with_max_node_count(mut self, max: u32) -> Self {
        self.max_node_count = (max > 0).then_some(max);
        self
    }
}

/// Compiles canvases into runnable graphs
#[async_trait]
pub trait GraphEngine: Send + Sync {
    async fn canvas_to_schema(
        &self,
        canvas: &serde_json::Value,
    ) -> Result<Arc<dyn WorkflowSchema>, EngineError>;

    /// Schema of the subgraph needed to run `node_id`
    async fn schema_from_node(
        &self,
        canvas: &serde_json::Value,
        node_id: &str,
    ) -> Result<Arc<dyn WorkflowSchema>, EngineError>;

    async fn compile(
        &self,
        schema: Arc<dyn WorkflowSchema>,
        options: CompileOptions,
    ) -> Result<Arc<dyn Graph>, EngineError>;

    async fn compile_from_node(
        &self,
        schema: Arc<dyn WorkflowSchema>,
        node_id: &str,
        options: CompileOptions,
    ) -> Result<Arc<dyn Graph>, EngineError>;
}

/// A compiled, runnable workflow
#[async_trait]
pub trait Graph: Send + Sync {
    /// Declared input shape
    fn inputs(&self) -> Vec<InputField>;

    fn terminate_plan(&self) -> TerminatePlan;

    /// Run to completion or suspension.
    ///
    /// `input` is `None` when resuming; the resume request is on the context.
    /// An interrupt is reported as [`EngineError::Interrupted`].
    async fn sync_run(
        &self,
        input: Option<Variables>,
        ctx: RunContext,
    ) -> Result<Variables, EngineError>;
}

/// Render run output per the graph's terminate plan
///
/// Variables are serialized whole for [`TerminatePlan::ReturnVariables`];
/// otherwise the `output` field is taken as the answer text.
pub fn render_output(plan: TerminatePlan, output: &Variables) -> serde_json::Result<String> {
    match plan {
        TerminatePlan::ReturnVariables => serde_json::to_string(output),
        TerminatePlan::UseAnswerContent => Ok(match output.get("output") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }),
    }
}
