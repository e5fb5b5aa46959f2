//! CLI module for wf-orchestrator
//!
//! This module provides:
//! - Command implementations (show, node, interrupts, cancel, ...)
//! - Output handlers (console, JSON, quiet)
//!
//! # Example
//!
//! ```ignore
//! use wf_orchestrator::cli::{commands, output};
//!
//! let handler = output::create_handler(output::OutputMode::Console);
//! let exit_code = commands::show(&coordinator, execute_id, true, &*handler).await?;
//! ```

pub mod commands;
pub mod output;

pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
