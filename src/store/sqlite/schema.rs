//! Database schema for execution history

use anyhow::Result;
use rusqlite::Connection;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_executions (
            id INTEGER PRIMARY KEY,
            workflow_id INTEGER NOT NULL,
            version TEXT NOT NULL DEFAULT '',
            space_id INTEGER NOT NULL,
            execute_config TEXT NOT NULL,
            status TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            input TEXT,
            output TEXT,
            error_code TEXT,
            fail_reason TEXT,
            input_tokens INTEGER,
            output_tokens INTEGER,
            node_count INTEGER NOT NULL DEFAULT 0,
            root_execution_id INTEGER NOT NULL,
            parent_node_id TEXT,
            current_resuming_event_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_workflow_executions_workflow ON workflow_executions(workflow_id);
        CREATE INDEX IF NOT EXISTS idx_workflow_executions_root ON workflow_executions(root_execution_id);

        CREATE TABLE IF NOT EXISTS node_executions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id INTEGER NOT NULL UNIQUE,
            execute_id INTEGER NOT NULL,
            node_id TEXT NOT NULL,
            node_name TEXT NOT NULL,
            node_type TEXT NOT NULL,
            status TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            input TEXT,
            output TEXT,
            error_info TEXT,
            input_tokens INTEGER,
            output_tokens INTEGER,
            parent_node_id TEXT,
            node_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_node_executions_execute ON node_executions(execute_id);
        CREATE INDEX IF NOT EXISTS idx_node_executions_node ON node_executions(execute_id, node_id);
        CREATE INDEX IF NOT EXISTS idx_node_executions_parent ON node_executions(execute_id, parent_node_id);

        CREATE TABLE IF NOT EXISTS interrupt_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            execute_id INTEGER NOT NULL,
            event_id INTEGER NOT NULL,
            node_key TEXT NOT NULL,
            node_title TEXT NOT NULL DEFAULT '',
            node_type TEXT NOT NULL,
            event_type TEXT NOT NULL,
            interrupt_data TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_interrupt_events_execute ON interrupt_events(execute_id);

        CREATE TABLE IF NOT EXISTS cancel_flags (
            execute_id INTEGER PRIMARY KEY,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS latest_executions (
            scenario TEXT NOT NULL,
            workflow_id INTEGER NOT NULL,
            node_id TEXT NOT NULL DEFAULT '',
            user_id INTEGER NOT NULL,
            execute_id INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(scenario, workflow_id, node_id, user_id)
        );
        "#,
    )?;

    Ok(())
}
