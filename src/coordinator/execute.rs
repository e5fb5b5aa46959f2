//! Starting new runs

use super::{ExecutionCoordinator, Snapshot, compile_error, parse_canvas};
use crate::engine::{CompileOptions, Graph, Variables, WorkflowSchema};
use crate::entity::{
    ExecuteConfig, ExecuteMode, GetPolicy, TerminatePlan, Workflow, WorkflowExecution,
    WorkflowMode,
};
use crate::error::Result;
use crate::runner::{MessageStream, RunInputs, pipe, spawn_run};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Which part of the workflow a run covers
#[derive(Clone, Copy)]
enum Entry<'a> {
    Workflow,
    /// The subgraph needed to run one node
    Node(&'a str),
}

/// Whether chat history is attached before the run
#[derive(Clone, Copy, PartialEq, Eq)]
enum History {
    Skip,
    Prefetch,
    /// Resolve the conversation from the input's conversation name first
    PrefetchByName,
}

/// A compiled run that has not been recorded yet
struct Launch {
    workflow: Workflow,
    schema: Arc<dyn WorkflowSchema>,
    graph: Arc<dyn Graph>,
    config: ExecuteConfig,
    input: Variables,
    raw_input: String,
}

impl ExecutionCoordinator {
    /// Run a workflow to its terminal outcome
    ///
    /// Failures after the execution id is allocated are reported through the
    /// returned execution's status and fail reason, not as an error.
    pub async fn sync_execute(
        &self,
        config: ExecuteConfig,
        input: Variables,
    ) -> Result<(WorkflowExecution, TerminatePlan)> {
        let Launch {
            workflow,
            schema,
            graph,
            config,
            input,
            raw_input,
        } = self.launch(config, &input, Entry::Workflow, History::Skip).await?;

        let created_at = Utc::now();
        let prepared = self
            .runner()
            .prepare(
                &workflow.basic(),
                schema.as_ref(),
                config.clone(),
                RunInputs::fresh(raw_input.clone()),
            )
            .await?;
        let execute_id = prepared.execute_id();
        let plan = graph.terminate_plan();

        let (output, event) = self.run_to_completion(prepared, graph, Some(input)).await?;

        let execution = Snapshot {
            execute_id,
            workflow: &workflow,
            config,
            node_count: schema.node_count(),
            input: raw_input,
            created_at,
        }
        .into_execution(event, output, plan)?;
        Ok((execution, plan))
    }

    /// Start a workflow in the background and return its execution id
    ///
    /// Callers poll [`get_execution`](Self::get_execution) for progress.
    pub async fn async_execute(&self, config: ExecuteConfig, input: Variables) -> Result<i64> {
        let launch = self
            .launch(config, &input, Entry::Workflow, History::Skip)
            .await?;
        let prepared = self
            .runner()
            .prepare(
                &launch.workflow.basic(),
                launch.schema.as_ref(),
                launch.config.clone(),
                RunInputs::fresh(launch.raw_input),
            )
            .await?;
        let execute_id = prepared.execute_id();

        if launch.config.mode == ExecuteMode::Debug {
            if let Err(e) = self
                .stores
                .history
                .set_test_run_latest_exe_id(launch.workflow.id, launch.config.operator, execute_id)
                .await
            {
                error!(execute_id, error = %e, "failed to set test run latest exe id");
            }
        }

        spawn_run(launch.graph, Some(launch.input), prepared.context);
        Ok(execute_id)
    }

    /// Start the subgraph ending at `node_id` in the background
    pub async fn async_execute_node(
        &self,
        node_id: &str,
        config: ExecuteConfig,
        input: Variables,
    ) -> Result<i64> {
        let launch = self
            .launch(config, &input, Entry::Node(node_id), History::PrefetchByName)
            .await?;
        let prepared = self
            .runner()
            .prepare(
                &launch.workflow.basic(),
                launch.schema.as_ref(),
                launch.config.clone(),
                RunInputs::fresh(launch.raw_input),
            )
            .await?;
        let execute_id = prepared.execute_id();

        if launch.config.mode == ExecuteMode::NodeDebug {
            if let Err(e) = self
                .stores
                .history
                .set_node_debug_latest_exe_id(
                    launch.workflow.id,
                    node_id,
                    launch.config.operator,
                    execute_id,
                )
                .await
            {
                error!(execute_id, node_id, error = %e, "failed to set node debug latest exe id");
            }
        }

        spawn_run(launch.graph, Some(launch.input), prepared.context);
        Ok(execute_id)
    }

    /// Start a workflow and stream its messages
    ///
    /// The stream ends after the final state message. Dropping it early
    /// makes further writes fail so the run can stop producing.
    pub async fn stream_execute(
        &self,
        config: ExecuteConfig,
        input: Variables,
    ) -> Result<MessageStream> {
        let launch = self
            .launch(config, &input, Entry::Workflow, History::Prefetch)
            .await?;
        let (writer, stream) = pipe(self.settings.stream_buffer);
        let prepared = self
            .runner()
            .prepare(
                &launch.workflow.basic(),
                launch.schema.as_ref(),
                launch.config,
                RunInputs::fresh(launch.raw_input).with_stream(writer),
            )
            .await?;

        spawn_run(launch.graph, Some(launch.input), prepared.context);
        Ok(stream)
    }

    /// Resolve, compile and convert everything a new run needs
    async fn launch(
        &self,
        mut config: ExecuteConfig,
        input: &Variables,
        entry: Entry<'_>,
        history: History,
    ) -> Result<Launch> {
        let engine = self.engine()?;

        let mut policy =
            GetPolicy::new(config.id, config.from).with_version(config.version.clone());
        if let Entry::Workflow = entry {
            policy = policy.with_commit(config.commit_id.clone());
        }
        let workflow = self.load_workflow(&policy).await?;
        config.workflow_mode = workflow.mode;

        if let Some(app_id) = workflow.app_id {
            if config.mode == ExecuteMode::Release {
                self.check_release_version(app_id, config.connector_id, config.id, &config.version)
                    .await?;
            }
        }

        let canvas = parse_canvas(&workflow)?;
        let schema = match entry {
            Entry::Workflow => engine.canvas_to_schema(&canvas).await,
            Entry::Node(node_id) => engine.schema_from_node(&canvas, node_id).await,
        }
        .map_err(compile_error("failed to convert canvas to workflow schema"))?;

        if history != History::Skip && config.workflow_mode == WorkflowMode::ChatFlow {
            let rounds = schema.history_rounds();
            if rounds > 0 {
                self.handle_history(&mut config, input, rounds, history == History::PrefetchByName)
                    .await?;
            }
        }

        config.input_file_fields = schema
            .input_file_fields()
            .into_iter()
            .map(|file| (file.file_url.clone(), file))
            .collect();

        let graph = match entry {
            Entry::Workflow => {
                engine
                    .compile(schema.clone(), self.compile_options(workflow.id))
                    .await
            }
            Entry::Node(node_id) => {
                engine
                    .compile_from_node(
                        schema.clone(),
                        node_id,
                        CompileOptions::named(workflow.id.to_string()),
                    )
                    .await
            }
        }
        .map_err(compile_error("failed to create workflow"))?;

        if config.app_id.is_none() {
            config.app_id = workflow.app_id;
        }
        config.commit_id = workflow.commit_id.clone();

        let converted = self.convert_input(&mut config, graph.as_ref(), input)?;
        let raw_input = serde_json::to_string(input)?;

        info!(
            workflow_id = workflow.id,
            version = %workflow.version,
            mode = ?config.mode,
            "workflow compiled"
        );

        Ok(Launch {
            workflow,
            schema,
            graph,
            config,
            input: converted,
            raw_input,
        })
    }
}
