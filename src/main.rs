use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error};
use wf_orchestrator::cli::{OutputEvent, OutputMode, commands, create_handler};
use wf_orchestrator::config::OrchestratorConfig;
use wf_orchestrator::coordinator::ExecutionCoordinator;
use wf_orchestrator::logging;
use wf_orchestrator::store::{SqliteStore, Stores};

#[derive(Parser)]
#[command(name = "wf-orchestrator")]
#[command(about = "Inspect and control workflow executions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user and project hierarchy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init,

    /// Show an execution
    Show {
        execute_id: i64,

        /// Include node executions
        #[arg(long)]
        nodes: bool,
    },

    /// Show one node execution
    Node { execute_id: i64, node_id: String },

    /// List pending interrupt events
    Interrupts { execute_id: i64 },

    /// Cancel a running or interrupted execution
    Cancel {
        execute_id: i64,

        #[arg(long)]
        workflow: i64,

        #[arg(long)]
        space: i64,
    },

    /// Entry input of a user's latest test run
    LatestTestRun {
        #[arg(long)]
        workflow: i64,

        #[arg(long)]
        user: i64,
    },

    /// A user's latest debug run of one node
    LatestNodeDebug {
        #[arg(long)]
        workflow: i64,

        #[arg(long)]
        node: String,

        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => OrchestratorConfig::load_file(path)?,
        None => OrchestratorConfig::load(None)?,
    };

    let log_file = cli.log_file.clone().or_else(|| config.logging.file_path());
    let guard = logging::init_logging(cli.debug, cli.quiet, log_file)?;

    let handler = create_handler(OutputMode::from_flags(cli.json, cli.quiet));

    if let Commands::Init = cli.command {
        let target = match cli.config.clone().or_else(OrchestratorConfig::user_config_path) {
            Some(target) => target,
            None => anyhow::bail!("Could not determine config directory"),
        };
        commands::init(&target, &*handler)?;
        return Ok(());
    }

    let db_path = config.storage.database_path()?;
    debug!(path = %db_path.display(), "opening execution database");
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let coordinator = ExecutionCoordinator::new(Stores::from_backend(store))
        .with_settings(config.execution.settings());

    let result = match cli.command {
        Commands::Init => Ok(0),
        Commands::Show { execute_id, nodes } => {
            commands::show(&coordinator, execute_id, nodes, &*handler).await
        }
        Commands::Node {
            execute_id,
            node_id,
        } => commands::node(&coordinator, execute_id, &node_id, &*handler).await,
        Commands::Interrupts { execute_id } => {
            commands::interrupts(&coordinator, execute_id, &*handler).await
        }
        Commands::Cancel {
            execute_id,
            workflow,
            space,
        } => commands::cancel(&coordinator, execute_id, workflow, space, &*handler).await,
        Commands::LatestTestRun { workflow, user } => {
            commands::latest_test_run(&coordinator, workflow, user, &*handler).await
        }
        Commands::LatestNodeDebug {
            workflow,
            node,
            user,
        } => commands::latest_node_debug(&coordinator, workflow, &node, user, &*handler).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            handler.emit(OutputEvent::Error {
                error: format!("{:#}", e),
            });
            1
        }
    };

    // Flush the file writer before exiting
    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
