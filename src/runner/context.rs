//! Per-run context handed to the graph engine

use super::cancel::CancellationToken;
use super::stream::MessageWriter;
use crate::engine::{EngineError, Variables, render_output};
use crate::entity::{
    ExecuteConfig, ExecutionUpdate, Message, NodeExecution, NodeType, ResumeRequest,
    TerminalEvent, TerminalKind, TerminatePlan, TokenUsage, WorkflowBasic, WorkflowExecuteStatus,
};
use crate::error::{OrchestratorError, Result};
use crate::store::{IdGenerator, Stores};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

pub(super) struct RunState {
    pub execute_id: i64,
    pub root_execution_id: i64,
    pub basic: WorkflowBasic,
    pub config: ExecuteConfig,
    pub resume: Option<ResumeRequest>,
    pub stores: Stores,
    pub ids: Arc<dyn IdGenerator>,
    pub cancel: CancellationToken,
    pub done: CancellationToken,
    pub writer: Mutex<Option<MessageWriter>>,
    pub terminal: Mutex<Option<oneshot::Sender<TerminalEvent>>>,
    pub usage: Mutex<TokenUsage>,
    pub finished: AtomicBool,
    pub started: Instant,
}

/// Handle a running graph reports through
///
/// Cheap to clone; all clones share one run.
#[derive(Clone)]
pub struct RunContext {
    state: Arc<RunState>,
}

impl RunContext {
    pub(super) fn new(state: RunState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn execute_id(&self) -> i64 {
        self.state.execute_id
    }

    pub fn root_execution_id(&self) -> i64 {
        self.state.root_execution_id
    }

    pub fn workflow(&self) -> &WorkflowBasic {
        &self.state.basic
    }

    pub fn config(&self) -> &ExecuteConfig {
        &self.state.config
    }

    /// Set when this run continues an interrupted execution
    pub fn resume(&self) -> Option<&ResumeRequest> {
        self.state.resume.as_ref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.state.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Allocate an id for a node row or interrupt event
    pub fn next_id(&self) -> i64 {
        self.state.ids.next_id()
    }

    /// A Running row for `node_id` in this execution, not yet recorded
    pub fn new_node(
        &self,
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        node_type: NodeType,
    ) -> NodeExecution {
        NodeExecution::started(
            self.next_id(),
            self.state.execute_id,
            node_id,
            node_name,
            node_type,
        )
    }

    /// Record that a node started
    pub async fn node_started(&self, node: &NodeExecution) -> Result<()> {
        self.state.stores.history.create_node_execution(node).await?;
        debug!(
            execute_id = self.state.execute_id,
            node_id = %node.node_id,
            "node started"
        );
        Ok(())
    }

    /// Record a node's final row and count its tokens
    pub async fn node_finished(&self, mut node: NodeExecution) -> Result<()> {
        node.updated_at = Some(Utc::now());
        self.state.stores.history.update_node_execution(&node).await?;
        if let Some(usage) = &node.token_info {
            self.state.usage.lock().await.add(usage);
        }
        debug!(
            execute_id = self.state.execute_id,
            node_id = %node.node_id,
            status = %node.status,
            "node finished"
        );
        Ok(())
    }

    /// Count tokens not attributed to a recorded node
    pub async fn add_usage(&self, usage: TokenUsage) {
        self.state.usage.lock().await.add(&usage);
    }

    /// Write a message to the caller's stream, if there is one
    ///
    /// Fails with `StreamClosed` once the reader went away.
    pub async fn emit(&self, message: Message) -> Result<()> {
        let writer = self.state.writer.lock().await.clone();
        match writer {
            Some(writer) => writer.send(message).await,
            None => Ok(()),
        }
    }

    pub async fn emit_data(
        &self,
        node_id: &str,
        node_title: &str,
        content: impl Into<String>,
        last: bool,
    ) -> Result<()> {
        self.emit(Message::data(
            self.state.execute_id,
            node_id,
            node_title,
            content,
            last,
        ))
        .await
    }

    /// Finalize from a graph result
    ///
    /// Returns the output variables on success. The rendered output is
    /// persisted with the execution.
    pub async fn settle(
        &self,
        result: std::result::Result<Variables, EngineError>,
        plan: TerminatePlan,
    ) -> Option<Variables> {
        match result {
            Ok(output) => {
                let rendered = match render_output(plan, &output) {
                    Ok(rendered) => Some(rendered),
                    Err(e) => {
                        warn!(execute_id = self.state.execute_id, error = %e, "failed to render output");
                        None
                    }
                };
                self.finish(TerminalKind::Success, rendered).await;
                Some(output)
            }
            Err(EngineError::Interrupted { events }) => {
                self.finish(TerminalKind::Interrupted { events }, None).await;
                None
            }
            Err(EngineError::Cancelled) => {
                self.finish(TerminalKind::Cancelled, None).await;
                None
            }
            Err(source) => {
                let err = OrchestratorError::Execute {
                    execute_id: self.state.execute_id,
                    space_id: self.state.basic.space_id,
                    workflow_id: self.state.basic.id,
                    source,
                };
                warn!(execute_id = self.state.execute_id, error = %err, "workflow run failed");
                self.finish(
                    TerminalKind::Failed {
                        reason: err.to_string(),
                    },
                    None,
                )
                .await;
                None
            }
        }
    }

    /// Record the terminal outcome and deliver the terminal event.
    ///
    /// Only the first call has any effect; it returns `true`.
    pub async fn finish(&self, kind: TerminalKind, output: Option<String>) -> bool {
        if self
            .state
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let execute_id = self.state.execute_id;
        let stores = &self.state.stores;
        let duration = self.elapsed();
        let usage = *self.state.usage.lock().await;

        let mut kind = kind;
        if matches!(
            kind,
            TerminalKind::Failed { .. } | TerminalKind::Interrupted { .. }
        ) && self.cancel_requested().await
        {
            kind = TerminalKind::Cancelled;
        }

        let mut update = ExecutionUpdate::status(execute_id, kind.status());
        update.duration = Some(duration);
        update.token_info = Some(usage);
        update.output = output;
        if let TerminalKind::Failed { reason } = &kind {
            update.fail_reason = Some(reason.clone());
        }

        // The event queue must be settled before the status flips to Interrupted
        if self.state.resume.is_some() {
            if let Err(e) = stores.interrupts.pop_first_interrupt_event(execute_id).await {
                error!(execute_id, error = %e, "failed to pop resumed interrupt event");
            }
        }

        let mut saved_events = Vec::new();
        if let TerminalKind::Interrupted { events } = &kind {
            if !events.is_empty() {
                match stores.interrupts.save_interrupt_events(execute_id, events).await {
                    Ok(()) => saved_events = events.iter().map(|e| e.id).collect(),
                    Err(e) => error!(execute_id, error = %e, "failed to save interrupt events"),
                }
            }
        }

        match stores
            .history
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Running])
            .await
        {
            Ok((0, current)) => {
                warn!(
                    execute_id,
                    wanted = %kind.status(),
                    current = %current,
                    "execution already finalized elsewhere"
                );
                kind = terminal_kind_for(current, kind);
                if !saved_events.is_empty() {
                    if let Err(e) = stores
                        .interrupts
                        .remove_interrupt_events(execute_id, &saved_events)
                        .await
                    {
                        error!(execute_id, error = %e, "failed to withdraw interrupt events");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(execute_id, error = %e, "failed to record execution outcome"),
        }

        if matches!(kind, TerminalKind::Failed { .. } | TerminalKind::Cancelled) {
            if let Err(e) = stores.history.cancel_all_running_nodes(execute_id).await {
                error!(execute_id, error = %e, "failed to cancel running nodes");
            }
        }

        let writer = self.state.writer.lock().await.take();
        if let Some(writer) = writer {
            let final_state = Message::state(execute_id, kind.status(), Some(usage));
            if writer.send(final_state).await.is_err() {
                debug!(execute_id, "stream reader gone before final state");
            }
        }

        self.state.done.cancel();

        info!(
            execute_id,
            status = %kind.status(),
            duration_ms = duration.as_millis() as u64,
            "workflow run finished"
        );

        let event = TerminalEvent {
            execute_id,
            kind,
            duration,
            token_usage: usage,
        };
        if let Some(sender) = self.state.terminal.lock().await.take() {
            let _ = sender.send(event);
        }
        true
    }

    fn elapsed(&self) -> Duration {
        // A finished run always reports a non-zero duration
        self.state.started.elapsed().max(Duration::from_micros(1))
    }

    async fn cancel_requested(&self) -> bool {
        if self.state.cancel.is_cancelled() {
            return true;
        }
        match self
            .state
            .stores
            .cancel_signals
            .get_workflow_cancel_flag(self.state.execute_id)
            .await
        {
            Ok(flag) => flag,
            Err(e) => {
                warn!(execute_id = self.state.execute_id, error = %e, "failed to read cancel flag");
                false
            }
        }
    }
}

/// Terminal kind matching a status some other writer persisted first
fn terminal_kind_for(current: WorkflowExecuteStatus, wanted: TerminalKind) -> TerminalKind {
    match current {
        WorkflowExecuteStatus::Cancel => TerminalKind::Cancelled,
        WorkflowExecuteStatus::Success => TerminalKind::Success,
        WorkflowExecuteStatus::Failed => match wanted {
            TerminalKind::Failed { reason } => TerminalKind::Failed { reason },
            _ => TerminalKind::Failed {
                reason: "execution failed".into(),
            },
        },
        WorkflowExecuteStatus::Interrupted => match wanted {
            TerminalKind::Interrupted { events } => TerminalKind::Interrupted { events },
            _ => TerminalKind::Interrupted { events: Vec::new() },
        },
        WorkflowExecuteStatus::Running => wanted,
    }
}
