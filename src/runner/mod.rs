//! Run preparation and finalization
//!
//! [`WorkflowRunner::prepare`] turns a compiled workflow into a recorded run:
//! - a fresh run gets a new execution id and a Running row
//! - a resumed run locks its Interrupted row back to Running
//!
//! Either way the caller gets a [`RunContext`] for the graph and a one-shot
//! receiver for the single terminal event.

mod cancel;
mod context;
pub mod stream;

pub use cancel::{CancellationToken, spawn_cancel_watcher};
pub use context::RunContext;
pub use stream::{MessageStream, MessageWriter, pipe};

use crate::engine::{Graph, Variables, WorkflowSchema};
use crate::entity::{
    ExecuteConfig, Message, ResumeRequest, TerminalEvent, TokenUsage, WorkflowBasic,
    WorkflowExecuteStatus, WorkflowExecution,
};
use crate::error::{OrchestratorError, Result};
use crate::store::{IdGenerator, Stores};
use context::RunState;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};

/// Runtime knobs for prepared runs
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub cancel_poll_interval: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            cancel_poll_interval: Duration::from_millis(200),
        }
    }
}

/// What a run starts from
#[derive(Debug, Default)]
pub struct RunInputs {
    /// Serialized caller input, recorded with a fresh execution
    pub input: Option<String>,

    /// Continue an interrupted execution instead of starting a new one
    pub resume: Option<ResumeRequest>,

    pub stream: Option<MessageWriter>,
}

impl RunInputs {
    pub fn fresh(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            ..Default::default()
        }
    }

    pub fn resume(request: ResumeRequest) -> Self {
        Self {
            resume: Some(request),
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, writer: MessageWriter) -> Self {
        self.stream = Some(writer);
        self
    }
}

/// A recorded run ready for the graph
pub struct PreparedRun {
    pub context: RunContext,
    pub terminal: oneshot::Receiver<TerminalEvent>,
}

impl PreparedRun {
    pub fn execute_id(&self) -> i64 {
        self.context.execute_id()
    }

    /// Wait for the single terminal event
    pub async fn wait(self) -> Result<TerminalEvent> {
        let execute_id = self.execute_id();
        self.terminal
            .await
            .map_err(|_| OrchestratorError::TerminalEventLost { execute_id })
    }
}

/// Records runs and builds their contexts
#[derive(Clone)]
pub struct WorkflowRunner {
    stores: Stores,
    ids: Arc<dyn IdGenerator>,
    settings: RunnerSettings,
}

impl WorkflowRunner {
    pub fn new(stores: Stores, ids: Arc<dyn IdGenerator>, settings: RunnerSettings) -> Self {
        Self {
            stores,
            ids,
            settings,
        }
    }

    pub async fn prepare(
        &self,
        basic: &WorkflowBasic,
        schema: &dyn WorkflowSchema,
        config: ExecuteConfig,
        inputs: RunInputs,
    ) -> Result<PreparedRun> {
        let RunInputs {
            input,
            resume,
            stream,
        } = inputs;

        let (execute_id, root_execution_id, resume) = match resume {
            Some(request) => {
                let (root, request) = self.lock_for_resume(request).await?;
                (request.execute_id, root, Some(request))
            }
            None => {
                let id = self.ids.next_id();
                let mut execution =
                    WorkflowExecution::running(id, basic.id, basic.version.clone(), basic.space_id);
                execution.execute_config = config.clone();
                execution.node_count = schema.node_count();
                execution.input = input;
                self.stores
                    .history
                    .create_workflow_execution(&execution)
                    .await?;
                info!(
                    execute_id = id,
                    workflow_id = basic.id,
                    mode = ?config.mode,
                    "workflow run prepared"
                );
                (id, id, None)
            }
        };

        let (sender, receiver) = oneshot::channel();
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        spawn_cancel_watcher(
            self.stores.cancel_signals.clone(),
            execute_id,
            cancel.clone(),
            done.clone(),
            self.settings.cancel_poll_interval,
        );

        let context = RunContext::new(RunState {
            execute_id,
            root_execution_id,
            basic: basic.clone(),
            config,
            resume,
            stores: self.stores.clone(),
            ids: self.ids.clone(),
            cancel,
            done,
            writer: Mutex::new(stream),
            terminal: Mutex::new(Some(sender)),
            usage: Mutex::new(TokenUsage::default()),
            finished: AtomicBool::new(false),
            started: Instant::now(),
        });

        Ok(PreparedRun {
            context,
            terminal: receiver,
        })
    }

    /// Lock an Interrupted execution for resuming its first pending event
    async fn lock_for_resume(&self, mut request: ResumeRequest) -> Result<(i64, ResumeRequest)> {
        let execute_id = request.execute_id;
        let execution = self
            .stores
            .history
            .get_workflow_execution(execute_id)
            .await?
            .ok_or_else(|| OrchestratorError::execution_not_found(execute_id))?;

        let event = self
            .stores
            .interrupts
            .get_first_interrupt_event(execute_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::invalid_state(format!(
                    "workflow execution {} has no pending interrupt event",
                    execute_id
                ))
            })?;

        if request.event_id != 0 && request.event_id != event.id {
            return Err(OrchestratorError::invalid_state(format!(
                "interrupt event {} is not the first pending event of execution {}, expected {}",
                request.event_id, execute_id, event.id
            )));
        }
        request.event_id = event.id;

        let (locked, status) = self
            .stores
            .history
            .try_lock_workflow_execution(execute_id, event.id)
            .await?;
        if !locked {
            return Err(OrchestratorError::not_interrupted(execute_id, status));
        }

        info!(execute_id, event_id = event.id, "resuming interrupted workflow");
        Ok((execution.root_execution_id, request))
    }
}

/// Run `graph` on its own task and finalize from its result
///
/// The task yields the output variables of a successful run.
pub fn spawn_run(
    graph: Arc<dyn Graph>,
    input: Option<Variables>,
    context: RunContext,
) -> tokio::task::JoinHandle<Option<Variables>> {
    tokio::spawn(async move {
        let execute_id = context.execute_id();
        let running = Message::state(execute_id, WorkflowExecuteStatus::Running, None);
        if context.emit(running).await.is_err() {
            debug!(execute_id, "stream reader gone before run start");
        }

        let plan = graph.terminate_plan();
        let result = graph.sync_run(input, context.clone()).await;
        context.settle(result, plan).await
    })
}
