//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use crate::entity::{InterruptEvent, NodeExecution, WorkflowExecution};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Pick the mode from the global flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::Json
        } else if quiet {
            Self::Quiet
        } else {
            Self::Console
        }
    }
}

/// Events emitted by the inspection commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    Execution {
        id: i64,
        workflow_id: i64,
        version: String,
        status: String,
        duration_ms: u64,
        node_count: u32,
        output: Option<String>,
        fail_reason: Option<String>,
    },
    Node {
        node_id: String,
        node_name: String,
        node_type: String,
        status: String,
        duration_ms: u64,
        /// Iterations when the row merges a batch
        iterations: usize,
    },
    Interrupt {
        id: i64,
        node_key: String,
        event_type: String,
        data: String,
    },
    Cancelled {
        execute_id: i64,
    },
    Info {
        message: String,
    },
    Error {
        error: String,
    },
}

impl OutputEvent {
    pub fn execution(exe: &WorkflowExecution) -> Self {
        Self::Execution {
            id: exe.id,
            workflow_id: exe.workflow_id,
            version: exe.version.clone(),
            status: exe.status.to_string(),
            duration_ms: exe.duration.as_millis() as u64,
            node_count: exe.node_count,
            output: exe.output.clone(),
            fail_reason: exe.fail_reason.clone(),
        }
    }

    pub fn node(node: &NodeExecution) -> Self {
        Self::Node {
            node_id: node.node_id.clone(),
            node_name: node.node_name.clone(),
            node_type: node.node_type.to_string(),
            status: node.status.to_string(),
            duration_ms: node.duration.as_millis() as u64,
            iterations: node.indexed_executions.iter().flatten().count(),
        }
    }

    pub fn interrupt(event: &InterruptEvent) -> Self {
        Self::Interrupt {
            id: event.id,
            node_key: event.node_key.clone(),
            event_type: event.event_type.as_str().to_string(),
            data: event.interrupt_data.clone(),
        }
    }
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);
}

/// Console output handler
pub struct ConsoleHandler;

impl ConsoleHandler {
    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", Duration::from_millis(ms).as_secs_f64())
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::Execution {
                id,
                workflow_id,
                version,
                status,
                duration_ms,
                node_count,
                output,
                fail_reason,
            } => {
                let version = if version.is_empty() { "draft".to_string() } else { version };
                println!("Execution {} (workflow {} @ {})", id, workflow_id, version);
                println!("  status:   {}", status);
                println!("  duration: {}", Self::format_duration(duration_ms));
                println!("  nodes:    {}", node_count);
                if let Some(output) = output.filter(|o| !o.is_empty()) {
                    println!("  output:   {}", output);
                }
                if let Some(reason) = fail_reason {
                    println!("  reason:   {}", reason);
                }
            }
            OutputEvent::Node {
                node_id,
                node_name,
                node_type,
                status,
                duration_ms,
                iterations,
            } => {
                let marker = match status.as_str() {
                    "success" => "✓",
                    "failed" | "cancel" => "✗",
                    _ => "…",
                };
                print!(
                    "  {} {} [{}] {} ({})",
                    marker,
                    node_id,
                    node_type,
                    node_name,
                    Self::format_duration(duration_ms)
                );
                if iterations > 0 {
                    print!(" x{}", iterations);
                }
                println!();
            }
            OutputEvent::Interrupt {
                id,
                node_key,
                event_type,
                data,
            } => {
                println!("  ? {} at node {} ({}): {}", id, node_key, event_type, data);
            }
            OutputEvent::Cancelled { execute_id } => {
                println!("✓ Cancel requested for execution {}", execute_id);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Error { error } => {
                eprintln!("Error: {}", error);
            }
        }
    }
}

/// JSON output handler, one object per line
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        let json = if self.pretty {
            serde_json::to_string_pretty(&event)
        } else {
            serde_json::to_string(&event)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

/// Quiet handler that only reports errors
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, event: OutputEvent) {
        if let OutputEvent::Error { error } = event {
            eprintln!("Error: {}", error);
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
