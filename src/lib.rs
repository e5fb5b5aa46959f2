//! Workflow execution orchestrator
//!
//! Starts, resumes, cancels and inspects runs of compiled workflow graphs.
//! The graph engine, workflow repository and chat history service are
//! supplied by the embedding application; execution state lives in the
//! stores under [`store`].

pub mod chat;
pub mod cli;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod engine;
pub mod entity;
pub mod error;
pub mod logging;
pub mod runner;
pub mod store;

pub use coordinator::{ExecutionCoordinator, ExecutionSettings};
pub use error::{OrchestratorError, Result};
