//! Types shared between the orchestrator and a graph engine

use crate::entity::InterruptEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Variable map flowing into and out of a graph
pub type Variables = serde_json::Map<String, serde_json::Value>;

/// Errors reported by a graph engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The run suspended; not a failure
    #[error("workflow interrupted with {} pending event(s)", events.len())]
    Interrupted { events: Vec<InterruptEvent> },

    /// The canvas could not be read into a schema
    #[error("invalid canvas: {0}")]
    Canvas(String),

    /// The schema could not be built into a runnable graph
    #[error("graph build failed: {0}")]
    Build(String),

    #[error("node '{0}' not found in workflow")]
    NodeNotFound(String),

    #[error("workflow exceeds node limit: {count} > {max}")]
    TooManyNodes { count: u32, max: u32 },

    /// The run observed cancellation and stopped
    #[error("workflow run cancelled")]
    Cancelled,

    /// A node failed while running
    #[error("{0}")]
    Run(String),
}

impl EngineError {
    pub fn run(message: impl Into<String>) -> Self {
        Self::Run(message.into())
    }

    pub fn interrupted(events: Vec<InterruptEvent>) -> Self {
        Self::Interrupted { events }
    }

    /// Interrupt events carried by this error, if it is an interrupt
    pub fn interrupt_events(&self) -> Option<&[InterruptEvent]> {
        match self {
            Self::Interrupted { events } => Some(events),
            _ => None,
        }
    }
}

/// Declared type of one graph input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// URL of an uploaded file
    File,
    Object {
        #[serde(default)]
        fields: Vec<InputField>,
    },
    Array {
        items: Box<FieldKind>,
    },
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::File => "file",
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
        }
    }
}

/// One declared input of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl InputField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}
