//! Domain types shared by the stores, the runner and the coordinator

mod config;
mod execution;
mod interrupt;
mod message;
mod node;
mod workflow;

pub use config::{
    ExecuteConfig, ExecuteMode, FileInfo, Locator, SchemaMessage, SyncPattern, WfMessage,
    WorkflowMode,
};
pub use execution::{
    ExecutionRef, ExecutionUpdate, TerminalEvent, TerminalKind, TerminatePlan, TokenUsage, WorkflowExecuteStatus,
    WorkflowExecution,
};
pub use interrupt::{InterruptEvent, InterruptEventType, ResumeRequest};
pub use message::{Message, MessageKind};
pub use node::{
    ENTRY_NODE_KEY, NodeExecuteStatus, NodeExecution, NodeType, generated_node_for_batch_mode,
    is_generated_node_for_batch_mode,
};
pub use workflow::{GetPolicy, Workflow, WorkflowBasic};
