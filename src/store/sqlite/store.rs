//! Execution history stored in SQLite

use super::schema::init_schema;
use crate::entity::{
    ExecutionUpdate, InterruptEvent, InterruptEventType, NodeExecuteStatus, NodeExecution,
    NodeType, TokenUsage, WorkflowExecuteStatus, WorkflowExecution,
};
use crate::store::{CancelSignalStore, ExecutionHistoryStore, InterruptEventStore};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

const EXECUTION_COLUMNS: &str = "id, workflow_id, version, space_id, execute_config, status, \
     duration_ms, input, output, error_code, fail_reason, input_tokens, output_tokens, node_count, \
     root_execution_id, parent_node_id, current_resuming_event_id, created_at, updated_at";

const NODE_COLUMNS: &str = "id, execute_id, node_id, node_name, node_type, status, duration_ms, \
     input, output, error_info, input_tokens, output_tokens, parent_node_id, node_index, \
     created_at, updated_at";

const EVENT_COLUMNS: &str =
    "event_id, node_key, node_title, node_type, event_type, interrupt_data, created_at";

const TEST_RUN: &str = "test_run";
const NODE_DEBUG: &str = "node_debug";

/// Execution, interrupt and cancel stores on one SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the execution database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory at {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open execution database at {}", path.display()))?;

        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database location under the user config directory
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(config_dir.join("wf-orchestrator").join("executions.db"))
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("invalid timestamp '{}': {}", value, e)))
}

fn parse_optional_time(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_time(idx, v)).transpose()
}

fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

fn token_columns(usage: Option<TokenUsage>) -> (Option<i64>, Option<i64>) {
    match usage {
        Some(u) => (Some(u.input_tokens), Some(u.output_tokens)),
        None => (None, None),
    }
}

fn token_usage(input: Option<i64>, output: Option<i64>) -> Option<TokenUsage> {
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)))
}

fn execution_from_row(row: &Row) -> rusqlite::Result<WorkflowExecution> {
    let config: String = row.get(4)?;
    let execute_config = serde_json::from_str(&config)
        .map_err(|e| conversion_error(4, format!("invalid execute config: {}", e)))?;
    let status: String = row.get(5)?;
    let status = WorkflowExecuteStatus::parse(&status)
        .ok_or_else(|| conversion_error(5, format!("unknown workflow status '{}'", status)))?;
    let duration: i64 = row.get(6)?;
    let node_count: i64 = row.get(13)?;

    Ok(WorkflowExecution {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        version: row.get(2)?,
        space_id: row.get(3)?,
        execute_config,
        status,
        duration: Duration::from_millis(duration.max(0) as u64),
        input: row.get(7)?,
        output: row.get(8)?,
        error_code: row.get(9)?,
        fail_reason: row.get(10)?,
        token_info: token_usage(row.get(11)?, row.get(12)?),
        node_count: node_count.max(0) as u32,
        root_execution_id: row.get(14)?,
        parent_node_id: row.get(15)?,
        current_resuming_event_id: row.get(16)?,
        created_at: parse_time(17, row.get(17)?)?,
        updated_at: parse_optional_time(18, row.get(18)?)?,
        interrupt_events: Vec::new(),
        node_executions: Vec::new(),
    })
}

fn node_from_row(row: &Row) -> rusqlite::Result<NodeExecution> {
    let node_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let status = NodeExecuteStatus::parse(&status)
        .ok_or_else(|| conversion_error(5, format!("unknown node status '{}'", status)))?;
    let duration: i64 = row.get(6)?;
    let index: i64 = row.get(13)?;

    Ok(NodeExecution {
        id: row.get(0)?,
        execute_id: row.get(1)?,
        node_id: row.get(2)?,
        node_name: row.get(3)?,
        node_type: NodeType::from(node_type),
        status,
        duration: Duration::from_millis(duration.max(0) as u64),
        input: row.get(7)?,
        output: row.get(8)?,
        error_info: row.get(9)?,
        token_info: token_usage(row.get(10)?, row.get(11)?),
        parent_node_id: row.get(12)?,
        index: index.max(0) as usize,
        created_at: parse_time(14, row.get(14)?)?,
        updated_at: parse_optional_time(15, row.get(15)?)?,
        indexed_executions: Vec::new(),
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<InterruptEvent> {
    let node_type: String = row.get(3)?;
    let event_type: String = row.get(4)?;
    let event_type = InterruptEventType::parse(&event_type)
        .ok_or_else(|| conversion_error(4, format!("unknown interrupt type '{}'", event_type)))?;

    Ok(InterruptEvent {
        id: row.get(0)?,
        node_key: row.get(1)?,
        node_title: row.get(2)?,
        node_type: NodeType::from(node_type),
        event_type,
        interrupt_data: row.get(5)?,
        created_at: parse_time(6, row.get(6)?)?,
    })
}

fn status_list(allowed: &[WorkflowExecuteStatus]) -> String {
    allowed
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn current_status(conn: &Connection, id: i64) -> Result<Option<WorkflowExecuteStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM workflow_executions WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;

    match status {
        Some(s) => match WorkflowExecuteStatus::parse(&s) {
            Some(status) => Ok(Some(status)),
            None => bail!("workflow execution {} has unknown status '{}'", id, s),
        },
        None => Ok(None),
    }
}

#[async_trait]
impl ExecutionHistoryStore for SqliteStore {
    async fn create_workflow_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let config = serde_json::to_string(&execution.execute_config)?;
        let (input_tokens, output_tokens) = token_columns(execution.token_info);
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO workflow_executions (id, workflow_id, version, space_id, execute_config, status,
                duration_ms, input, output, error_code, fail_reason, input_tokens, output_tokens, node_count,
                root_execution_id, parent_node_id, current_resuming_event_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                execution.id,
                execution.workflow_id,
                &execution.version,
                execution.space_id,
                &config,
                execution.status.as_str(),
                duration_ms(execution.duration),
                &execution.input,
                &execution.output,
                &execution.error_code,
                &execution.fail_reason,
                input_tokens,
                output_tokens,
                execution.node_count as i64,
                execution.root_execution_id,
                &execution.parent_node_id,
                execution.current_resuming_event_id,
                execution.created_at.to_rfc3339(),
                execution.updated_at.map(|t| t.to_rfc3339()),
            ],
        )
        .with_context(|| format!("Failed to insert workflow execution {}", execution.id))?;

        Ok(())
    }

    async fn update_workflow_execution(
        &self,
        update: &ExecutionUpdate,
        allowed: &[WorkflowExecuteStatus],
    ) -> Result<(u64, WorkflowExecuteStatus)> {
        let conn = self.conn.lock().await;

        let rows = if allowed.is_empty() {
            0
        } else {
            let (input_tokens, output_tokens) = token_columns(update.token_info);
            let sql = format!(
                "UPDATE workflow_executions SET
                    status = ?2,
                    updated_at = ?3,
                    duration_ms = COALESCE(?4, duration_ms),
                    output = COALESCE(?5, output),
                    error_code = COALESCE(?6, error_code),
                    fail_reason = COALESCE(?7, fail_reason),
                    input_tokens = COALESCE(?8, input_tokens),
                    output_tokens = COALESCE(?9, output_tokens)
                 WHERE id = ?1 AND status IN ({})",
                status_list(allowed)
            );
            conn.execute(
                &sql,
                params![
                    update.id,
                    update.status.as_str(),
                    update.updated_at.to_rfc3339(),
                    update.duration.map(duration_ms),
                    &update.output,
                    &update.error_code,
                    &update.fail_reason,
                    input_tokens,
                    output_tokens,
                ],
            )?
        };

        match current_status(&conn, update.id)? {
            Some(status) => Ok((rows as u64, status)),
            None => bail!("workflow execution {} not found", update.id),
        }
    }

    async fn try_lock_workflow_execution(
        &self,
        id: i64,
        resuming_event_id: i64,
    ) -> Result<(bool, WorkflowExecuteStatus)> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE workflow_executions
             SET status = ?2, current_resuming_event_id = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?5",
            params![
                id,
                WorkflowExecuteStatus::Running.as_str(),
                resuming_event_id,
                Utc::now().to_rfc3339(),
                WorkflowExecuteStatus::Interrupted.as_str(),
            ],
        )?;

        match current_status(&conn, id)? {
            Some(status) => Ok((rows > 0, status)),
            None => bail!("workflow execution {} not found", id),
        }
    }

    async fn get_workflow_execution(&self, id: i64) -> Result<Option<WorkflowExecution>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM workflow_executions WHERE id = ?1",
            EXECUTION_COLUMNS
        );
        let execution = conn
            .query_row(&sql, [id], execution_from_row)
            .optional()
            .with_context(|| format!("Failed to load workflow execution {}", id))?;
        Ok(execution)
    }

    async fn create_node_execution(&self, execution: &NodeExecution) -> Result<()> {
        let (input_tokens, output_tokens) = token_columns(execution.token_info);
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO node_executions (id, execute_id, node_id, node_name, node_type, status, duration_ms,
                input, output, error_info, input_tokens, output_tokens, parent_node_id, node_index,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                execution.id,
                execution.execute_id,
                &execution.node_id,
                &execution.node_name,
                execution.node_type.as_str(),
                execution.status.as_str(),
                duration_ms(execution.duration),
                &execution.input,
                &execution.output,
                &execution.error_info,
                input_tokens,
                output_tokens,
                &execution.parent_node_id,
                execution.index as i64,
                execution.created_at.to_rfc3339(),
                execution.updated_at.map(|t| t.to_rfc3339()),
            ],
        )
        .with_context(|| format!("Failed to insert node execution {}", execution.id))?;

        Ok(())
    }

    async fn update_node_execution(&self, execution: &NodeExecution) -> Result<()> {
        let (input_tokens, output_tokens) = token_columns(execution.token_info);
        let updated_at = execution.updated_at.unwrap_or_else(Utc::now);
        let conn = self.conn.lock().await;

        let rows = conn.execute(
            "UPDATE node_executions SET
                status = ?2,
                duration_ms = ?3,
                input = ?4,
                output = ?5,
                error_info = ?6,
                input_tokens = ?7,
                output_tokens = ?8,
                updated_at = ?9
             WHERE id = ?1",
            params![
                execution.id,
                execution.status.as_str(),
                duration_ms(execution.duration),
                &execution.input,
                &execution.output,
                &execution.error_info,
                input_tokens,
                output_tokens,
                updated_at.to_rfc3339(),
            ],
        )?;

        if rows == 0 {
            bail!("node execution {} not found", execution.id);
        }
        Ok(())
    }

    async fn cancel_all_running_nodes(&self, execute_id: i64) -> Result<u64> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE node_executions SET status = ?2, updated_at = ?3
             WHERE execute_id = ?1 AND status = ?4",
            params![
                execute_id,
                NodeExecuteStatus::Cancel.as_str(),
                Utc::now().to_rfc3339(),
                NodeExecuteStatus::Running.as_str(),
            ],
        )?;
        Ok(rows as u64)
    }

    async fn get_node_executions_by_exe_id(&self, execute_id: i64) -> Result<Vec<NodeExecution>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM node_executions WHERE execute_id = ?1 ORDER BY seq",
            NODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([execute_id], node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get_node_execution(
        &self,
        execute_id: i64,
        node_id: &str,
    ) -> Result<Option<NodeExecution>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM node_executions WHERE execute_id = ?1 AND node_id = ?2
             ORDER BY parent_node_id IS NOT NULL, seq LIMIT 1",
            NODE_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![execute_id, node_id], node_from_row)
            .optional()?;
        Ok(row)
    }

    async fn get_node_execution_by_parent(
        &self,
        execute_id: i64,
        parent_node_id: &str,
    ) -> Result<Vec<NodeExecution>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM node_executions WHERE execute_id = ?1 AND parent_node_id = ?2 ORDER BY seq",
            NODE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![execute_id, parent_node_id], node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn set_test_run_latest_exe_id(
        &self,
        workflow_id: i64,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        set_latest(&conn, TEST_RUN, workflow_id, "", user_id, execute_id)
    }

    async fn get_test_run_latest_exe_id(
        &self,
        workflow_id: i64,
        user_id: i64,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        get_latest(&conn, TEST_RUN, workflow_id, "", user_id)
    }

    async fn set_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
        execute_id: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        set_latest(&conn, NODE_DEBUG, workflow_id, node_id, user_id, execute_id)
    }

    async fn get_node_debug_latest_exe_id(
        &self,
        workflow_id: i64,
        node_id: &str,
        user_id: i64,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        get_latest(&conn, NODE_DEBUG, workflow_id, node_id, user_id)
    }
}

fn set_latest(
    conn: &Connection,
    scenario: &str,
    workflow_id: i64,
    node_id: &str,
    user_id: i64,
    execute_id: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO latest_executions (scenario, workflow_id, node_id, user_id, execute_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(scenario, workflow_id, node_id, user_id) DO UPDATE SET
            execute_id = excluded.execute_id,
            updated_at = excluded.updated_at",
        params![
            scenario,
            workflow_id,
            node_id,
            user_id,
            execute_id,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn get_latest(
    conn: &Connection,
    scenario: &str,
    workflow_id: i64,
    node_id: &str,
    user_id: i64,
) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT execute_id FROM latest_executions
             WHERE scenario = ?1 AND workflow_id = ?2 AND node_id = ?3 AND user_id = ?4",
            params![scenario, workflow_id, node_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

#[async_trait]
impl InterruptEventStore for SqliteStore {
    async fn save_interrupt_events(
        &self,
        execute_id: i64,
        events: &[InterruptEvent],
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for event in events {
            tx.execute(
                "INSERT INTO interrupt_events (execute_id, event_id, node_key, node_title, node_type,
                    event_type, interrupt_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    execute_id,
                    event.id,
                    &event.node_key,
                    &event.node_title,
                    event.node_type.as_str(),
                    event.event_type.as_str(),
                    &event.interrupt_data,
                    event.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM interrupt_events WHERE execute_id = ?1 ORDER BY seq LIMIT 1",
            EVENT_COLUMNS
        );
        let event = conn
            .query_row(&sql, [execute_id], event_from_row)
            .optional()?;
        Ok(event)
    }

    async fn update_first_interrupt_event(
        &self,
        execute_id: i64,
        event: &InterruptEvent,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE interrupt_events SET
                event_id = ?2, node_key = ?3, node_title = ?4, node_type = ?5,
                event_type = ?6, interrupt_data = ?7
             WHERE seq = (SELECT MIN(seq) FROM interrupt_events WHERE execute_id = ?1)",
            params![
                execute_id,
                event.id,
                &event.node_key,
                &event.node_title,
                event.node_type.as_str(),
                event.event_type.as_str(),
                &event.interrupt_data,
            ],
        )?;

        if rows == 0 {
            bail!("no interrupt event pending for execution {}", execute_id);
        }
        Ok(())
    }

    async fn pop_first_interrupt_event(&self, execute_id: i64) -> Result<Option<InterruptEvent>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let sql = format!(
            "SELECT seq, {} FROM interrupt_events WHERE execute_id = ?1 ORDER BY seq LIMIT 1",
            EVENT_COLUMNS
        );
        let first = tx
            .query_row(&sql, [execute_id], |row| {
                let seq: i64 = row.get(0)?;
                let event = InterruptEvent {
                    id: row.get(1)?,
                    node_key: row.get(2)?,
                    node_title: row.get(3)?,
                    node_type: NodeType::from(row.get::<_, String>(4)?),
                    event_type: {
                        let raw: String = row.get(5)?;
                        InterruptEventType::parse(&raw).ok_or_else(|| {
                            conversion_error(5, format!("unknown interrupt type '{}'", raw))
                        })?
                    },
                    interrupt_data: row.get(6)?,
                    created_at: parse_time(7, row.get(7)?)?,
                };
                Ok((seq, event))
            })
            .optional()?;

        let Some((seq, event)) = first else {
            return Ok(None);
        };
        tx.execute("DELETE FROM interrupt_events WHERE seq = ?1", [seq])?;
        tx.commit()?;
        Ok(Some(event))
    }

    async fn remove_interrupt_events(&self, execute_id: i64, event_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for event_id in event_ids {
            tx.execute(
                "DELETE FROM interrupt_events WHERE execute_id = ?1 AND event_id = ?2",
                params![execute_id, event_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_interrupt_events(&self, execute_id: i64) -> Result<Vec<InterruptEvent>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {} FROM interrupt_events WHERE execute_id = ?1 ORDER BY seq",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map([execute_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

#[async_trait]
impl CancelSignalStore for SqliteStore {
    async fn set_workflow_cancel_flag(&self, execute_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO cancel_flags (execute_id, created_at) VALUES (?1, ?2)
             ON CONFLICT(execute_id) DO NOTHING",
            params![execute_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn get_workflow_cancel_flag(&self, execute_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT execute_id FROM cancel_flags WHERE execute_id = ?1",
                [execute_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ExecuteConfig, ExecuteMode, Locator};
    use tempfile::TempDir;

    fn execution(id: i64, status: WorkflowExecuteStatus) -> WorkflowExecution {
        let mut exe = WorkflowExecution::running(id, 10, "v0.0.1".into(), 100);
        exe.status = status;
        exe.execute_config =
            ExecuteConfig::new(10, Locator::SpecificVersion, ExecuteMode::Release, 7)
                .with_version("v0.0.1")
                .with_connector(1024);
        exe.input = Some(r#"{"q":"hi"}"#.into());
        exe.node_count = 4;
        exe
    }

    #[tokio::test]
    async fn test_execution_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let exe = execution(1, WorkflowExecuteStatus::Running);
        store.create_workflow_execution(&exe).await.unwrap();

        let loaded = store.get_workflow_execution(1).await.unwrap().unwrap();
        assert_eq!(loaded.id, 1);
        assert_eq!(loaded.version, "v0.0.1");
        assert_eq!(loaded.execute_config, exe.execute_config);
        assert_eq!(loaded.status, WorkflowExecuteStatus::Running);
        assert_eq!(loaded.input, exe.input);
        assert_eq!(loaded.node_count, 4);
        assert_eq!(loaded.root_execution_id, 1);
        assert!(loaded.token_info.is_none());

        assert!(store.get_workflow_execution(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_workflow_execution(&execution(1, WorkflowExecuteStatus::Running))
            .await
            .unwrap();

        let mut update = ExecutionUpdate::status(1, WorkflowExecuteStatus::Cancel);
        update.fail_reason = Some("cancelled by user".into());
        let (rows, status) = store
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Interrupted])
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(status, WorkflowExecuteStatus::Running);

        let mut update = ExecutionUpdate::status(1, WorkflowExecuteStatus::Success);
        update.duration = Some(Duration::from_millis(1500));
        update.output = Some("done".into());
        update.token_info = Some(TokenUsage::new(10, 5));
        let (rows, status) = store
            .update_workflow_execution(&update, &[WorkflowExecuteStatus::Running])
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(status, WorkflowExecuteStatus::Success);

        let loaded = store.get_workflow_execution(1).await.unwrap().unwrap();
        assert_eq!(loaded.output.as_deref(), Some("done"));
        assert_eq!(loaded.duration, Duration::from_millis(1500));
        assert_eq!(loaded.token_info, Some(TokenUsage::new(10, 5)));
        assert!(loaded.fail_reason.is_none());
        assert!(loaded.updated_at.is_some());

        let missing = ExecutionUpdate::status(9, WorkflowExecuteStatus::Cancel);
        assert!(
            store
                .update_workflow_execution(&missing, &[WorkflowExecuteStatus::Running])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_try_lock() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .create_workflow_execution(&execution(1, WorkflowExecuteStatus::Interrupted))
            .await
            .unwrap();

        assert_eq!(
            store.try_lock_workflow_execution(1, 77).await.unwrap(),
            (true, WorkflowExecuteStatus::Running)
        );
        assert_eq!(
            store.try_lock_workflow_execution(1, 77).await.unwrap(),
            (false, WorkflowExecuteStatus::Running)
        );
        let loaded = store.get_workflow_execution(1).await.unwrap().unwrap();
        assert_eq!(loaded.current_resuming_event_id, Some(77));
    }

    #[tokio::test]
    async fn test_node_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let batch = NodeExecution::started(30, 1, "batch", "Batch", NodeType::Batch);
        let inner_b = NodeExecution::started(20, 1, "llm", "LLM", NodeType::Llm).with_parent("batch", 1);
        let inner_a = NodeExecution::started(10, 1, "llm", "LLM", NodeType::Llm).with_parent("batch", 0);
        store.create_node_execution(&batch).await.unwrap();
        store.create_node_execution(&inner_b).await.unwrap();
        store.create_node_execution(&inner_a).await.unwrap();

        let rows = store.get_node_executions_by_exe_id(1).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![30, 20, 10]);
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[0].node_type, NodeType::Batch);

        let mut finished = inner_b.clone();
        finished.status = NodeExecuteStatus::Success;
        finished.output = Some("ok".into());
        finished.token_info = Some(TokenUsage::new(3, 4));
        store.update_node_execution(&finished).await.unwrap();

        assert_eq!(store.cancel_all_running_nodes(1).await.unwrap(), 2);

        let children = store.get_node_execution_by_parent(1, "batch").await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].status, NodeExecuteStatus::Success);
        assert_eq!(children[0].token_info, Some(TokenUsage::new(3, 4)));
        assert_eq!(children[1].status, NodeExecuteStatus::Cancel);

        let row = store.get_node_execution(1, "llm").await.unwrap().unwrap();
        assert_eq!(row.id, 20);
        assert!(store.get_node_execution(1, "none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupt_queue() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = InterruptEvent::new(5, "qa", NodeType::QuestionAnswer, InterruptEventType::Question, "{\"q\":1}");
        let second = InterruptEvent::new(6, "auth", NodeType::Plugin, InterruptEventType::OAuthPlugin, "{}");
        store
            .save_interrupt_events(1, &[first.clone(), second.clone()])
            .await
            .unwrap();

        let got = store.get_first_interrupt_event(1).await.unwrap().unwrap();
        assert_eq!(got.id, 5);
        assert_eq!(got.event_type, InterruptEventType::Question);

        let retitled = first.clone().with_title("Ask user");
        store.update_first_interrupt_event(1, &retitled).await.unwrap();

        let popped = store.pop_first_interrupt_event(1).await.unwrap().unwrap();
        assert_eq!(popped.node_title, "Ask user");

        let rest = store.list_interrupt_events(1).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event_type, InterruptEventType::OAuthPlugin);

        store.pop_first_interrupt_event(1).await.unwrap();
        assert!(store.pop_first_interrupt_event(1).await.unwrap().is_none());
        assert!(store.update_first_interrupt_event(1, &first).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_interrupt_events_keeps_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let events: Vec<_> = (1..=3)
            .map(|id| InterruptEvent::new(id, "qa", NodeType::QuestionAnswer, InterruptEventType::Question, "{}"))
            .collect();
        store.save_interrupt_events(1, &events).await.unwrap();
        store.save_interrupt_events(2, &events[1..2]).await.unwrap();

        store.remove_interrupt_events(1, &[2]).await.unwrap();

        let rest: Vec<i64> = store
            .list_interrupt_events(1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(rest, vec![1, 3]);
        assert_eq!(store.list_interrupt_events(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flags_and_latest_pointers_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("executions.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set_workflow_cancel_flag(1).await.unwrap();
            store.set_workflow_cancel_flag(1).await.unwrap();
            store.set_test_run_latest_exe_id(10, 7, 100).await.unwrap();
            store.set_test_run_latest_exe_id(10, 7, 101).await.unwrap();
            store.set_node_debug_latest_exe_id(10, "n1", 7, 200).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_workflow_cancel_flag(1).await.unwrap());
        assert!(!store.get_workflow_cancel_flag(2).await.unwrap());
        assert_eq!(store.get_test_run_latest_exe_id(10, 7).await.unwrap(), Some(101));
        assert_eq!(
            store.get_node_debug_latest_exe_id(10, "n1", 7).await.unwrap(),
            Some(200)
        );
        assert_eq!(store.get_node_debug_latest_exe_id(10, "n2", 7).await.unwrap(), None);
    }
}
