//! Execution coordinator
//!
//! Entry point for everything a caller does with a workflow run:
//! - start it synchronously, in the background, or as a message stream
//! - resume it after an interrupt
//! - cancel it
//! - inspect it and its node executions
//!
//! # Example
//!
//! ```ignore
//! use wf_orchestrator::coordinator::ExecutionCoordinator;
//! use wf_orchestrator::store::{MemoryStore, Stores};
//! use std::sync::Arc;
//!
//! let coordinator = ExecutionCoordinator::new(Stores::from_backend(Arc::new(MemoryStore::new())))
//!     .with_engine(engine)
//!     .with_repository(repository);
//!
//! let (execution, plan) = coordinator.sync_execute(config, input).await?;
//! ```

mod cancel;
mod execute;
mod history;
pub mod merge;
mod query;
mod resume;

pub use history::CONVERSATION_NAME_KEY;
pub use merge::merge_composite_inner_nodes;

use crate::chat::ChatHistoryService;
use crate::convert::{ConvertOptions, convert_inputs};
use crate::engine::{
    CompileOptions, EngineError, Graph, GraphEngine, Variables, render_output,
};
use crate::entity::{
    ExecuteConfig, GetPolicy, TerminalEvent, TerminalKind, TerminatePlan, Workflow,
    WorkflowExecution,
};
use crate::error::{OrchestratorError, Result};
use crate::runner::{PreparedRun, RunnerSettings, WorkflowRunner, spawn_run};
use crate::runner::stream::DEFAULT_STREAM_BUFFER;
use crate::store::{IdGenerator, SnowflakeIdGenerator, Stores, WorkflowRepository};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Static execution limits shared by every run
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Reject workflows with more nodes than this; 0 means unlimited
    pub max_node_count: u32,

    /// Capacity of the message pipe handed to streaming callers
    pub stream_buffer: usize,

    pub cancel_poll_interval: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_node_count: 0,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            cancel_poll_interval: RunnerSettings::default().cancel_poll_interval,
        }
    }
}

/// Starts, resumes, cancels and inspects workflow runs
#[derive(Clone)]
pub struct ExecutionCoordinator {
    stores: Stores,
    ids: Arc<dyn IdGenerator>,
    engine: Option<Arc<dyn GraphEngine>>,
    repository: Option<Arc<dyn WorkflowRepository>>,
    chat: Option<Arc<dyn ChatHistoryService>>,
    settings: ExecutionSettings,
}

impl ExecutionCoordinator {
    /// Coordinator over the given stores
    ///
    /// Query and cancel operations work with stores alone; starting or
    /// resuming a run also needs an engine and a repository.
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            ids: Arc::new(SnowflakeIdGenerator::new()),
            engine: None,
            repository: None,
            chat: None,
            settings: ExecutionSettings::default(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn GraphEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn WorkflowRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatHistoryService>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    fn runner(&self) -> WorkflowRunner {
        WorkflowRunner::new(
            self.stores.clone(),
            self.ids.clone(),
            RunnerSettings {
                cancel_poll_interval: self.settings.cancel_poll_interval,
            },
        )
    }

    fn engine(&self) -> Result<&dyn GraphEngine> {
        self.engine
            .as_deref()
            .ok_or(OrchestratorError::Unconfigured("graph engine"))
    }

    async fn load_workflow(&self, policy: &GetPolicy) -> Result<Workflow> {
        let repository = self
            .repository
            .as_deref()
            .ok_or(OrchestratorError::Unconfigured("workflow repository"))?;
        repository
            .get_workflow(policy)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound {
                what: "workflow",
                id: policy.id.to_string(),
            })
    }

    /// A release run of an app workflow must use a version published to its connector
    async fn check_release_version(
        &self,
        app_id: i64,
        connector_id: i64,
        workflow_id: i64,
        version: &str,
    ) -> Result<()> {
        let repository = self
            .repository
            .as_deref()
            .ok_or(OrchestratorError::Unconfigured("workflow repository"))?;
        let published = repository
            .is_application_connector_workflow_version(connector_id, workflow_id, version)
            .await?;
        if !published {
            return Err(OrchestratorError::VersionNotFound {
                app_id,
                workflow_id,
                connector_id,
                version: version.to_string(),
            });
        }
        Ok(())
    }

    fn compile_options(&self, workflow_id: i64) -> CompileOptions {
        CompileOptions::named(workflow_id.to_string())
            .with_max_node_count(self.settings.max_node_count)
    }

    /// Convert caller input to the graph's shape and record uploaded files
    fn convert_input(
        &self,
        config: &mut ExecuteConfig,
        graph: &dyn Graph,
        input: &Variables,
    ) -> Result<Variables> {
        let options = ConvertOptions {
            fail_fast: config.input_fail_fast,
            collect_files: true,
        };
        let converted = convert_inputs(input, &graph.inputs(), options)?;
        if !converted.warnings.is_empty() {
            warn!(
                workflow_id = config.id,
                warnings = %converted.warnings,
                "input conversion warnings"
            );
        }
        config.input_file_fields.extend(converted.files);
        Ok(converted.values)
    }

    /// Run a prepared graph and wait for its terminal event
    async fn run_to_completion(
        &self,
        prepared: PreparedRun,
        graph: Arc<dyn Graph>,
        input: Option<Variables>,
    ) -> Result<(Option<Variables>, TerminalEvent)> {
        let context = prepared.context.clone();
        let output = match spawn_run(graph, input, prepared.context.clone()).await {
            Ok(output) => output,
            Err(e) => {
                error!(execute_id = context.execute_id(), error = %e, "workflow run task aborted");
                context
                    .finish(
                        TerminalKind::Failed {
                            reason: format!("workflow run task aborted: {}", e),
                        },
                        None,
                    )
                    .await;
                None
            }
        };
        drop(context);
        let event = prepared.wait().await?;
        Ok((output, event))
    }
}

fn compile_error(stage: &'static str) -> impl FnOnce(EngineError) -> OrchestratorError {
    move |source| OrchestratorError::Compile { stage, source }
}

fn parse_canvas(workflow: &Workflow) -> Result<serde_json::Value> {
    serde_json::from_str(&workflow.canvas).map_err(|e| OrchestratorError::Compile {
        stage: "failed to unmarshal canvas",
        source: EngineError::Canvas(e.to_string()),
    })
}

/// What a synchronous caller learns about a finished run
struct Snapshot<'a> {
    execute_id: i64,
    workflow: &'a Workflow,
    config: ExecuteConfig,
    node_count: u32,
    input: String,
    created_at: DateTime<Utc>,
}

impl Snapshot<'_> {
    fn into_execution(
        self,
        event: TerminalEvent,
        output: Option<Variables>,
        plan: TerminatePlan,
    ) -> Result<WorkflowExecution> {
        let output = render_output(plan, &output.unwrap_or_default())?;

        let mut execution = WorkflowExecution::running(
            self.execute_id,
            self.workflow.id,
            self.workflow.version.clone(),
            self.workflow.space_id,
        );
        execution.execute_config = self.config;
        execution.created_at = self.created_at;
        execution.updated_at = Some(Utc::now());
        execution.node_count = self.node_count;
        execution.status = event.kind.status();
        execution.duration = event.duration;
        execution.input = Some(self.input);
        execution.output = Some(output);
        execution.error_code = Some("-1".to_string());
        execution.fail_reason = event.fail_reason();
        execution.token_info = Some(event.token_usage);
        execution.interrupt_events = event.interrupt_events();
        Ok(execution)
    }
}
