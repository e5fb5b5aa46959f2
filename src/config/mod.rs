//! Configuration types and loading for wf-orchestrator

mod loader;

pub use loader::{ExecutionConfig, LoggingConfig, OrchestratorConfig, StorageConfig};
