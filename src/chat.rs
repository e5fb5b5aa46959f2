//! Chat history for chat-flow runs
//!
//! Conversations live outside the orchestrator. Before a chat-flow run starts,
//! the last few rounds of the conversation are fetched and attached to the
//! run's [`ExecuteConfig`] so model nodes can read them.

use crate::entity::{ExecuteConfig, SchemaMessage, WfMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Conversation collaborator
#[async_trait]
pub trait ChatHistoryService: Send + Sync {
    /// Ids of the latest `rounds` runs in a conversation section, newest first
    async fn latest_run_ids(
        &self,
        conversation_id: i64,
        biz_id: i64,
        user_id: i64,
        rounds: u32,
        section_id: i64,
    ) -> Result<Vec<i64>>;

    /// Messages of the given runs in both representations
    async fn messages_by_run_ids(
        &self,
        conversation_id: i64,
        run_ids: &[i64],
    ) -> Result<(Vec<WfMessage>, Vec<SchemaMessage>)>;

    /// Resolve a conversation by name, creating it when missing
    ///
    /// Returns `(conversation_id, section_id)`.
    async fn get_or_create_conversation(
        &self,
        biz_id: i64,
        connector_id: i64,
        user_id: i64,
        name: &str,
    ) -> Result<(i64, i64)>;
}

/// Attach the previous `rounds` rounds of conversation to `config`
///
/// The newest run is the one about to start and is skipped. Missing
/// conversation identity is not an error; nothing is fetched.
pub async fn prefetch_chat_history(
    service: &dyn ChatHistoryService,
    config: &mut ExecuteConfig,
    rounds: u32,
) -> Result<()> {
    let Some(section_id) = config.section_id else {
        warn!(workflow_id = config.id, "chat history skipped: no section id");
        return Ok(());
    };
    let conversation_id = match config.conversation_id {
        Some(id) if id != 0 => id,
        _ => {
            warn!(workflow_id = config.id, "chat history skipped: no conversation id");
            return Ok(());
        }
    };
    let Some(biz_id) = config.biz_id() else {
        warn!(workflow_id = config.id, "chat history skipped: neither app nor agent id set");
        return Ok(());
    };

    let run_ids = service
        .latest_run_ids(conversation_id, biz_id, config.operator, rounds + 1, section_id)
        .await
        .with_context(|| format!("failed to list runs of conversation {}", conversation_id))?;

    if run_ids.len() <= 1 {
        debug!(conversation_id, "no previous rounds to prefetch");
        return Ok(());
    }

    let (messages, schema_messages) = service
        .messages_by_run_ids(conversation_id, &run_ids[1..])
        .await
        .with_context(|| format!("failed to load messages of conversation {}", conversation_id))?;

    debug!(
        conversation_id,
        rounds = run_ids.len() - 1,
        messages = messages.len(),
        "prefetched chat history"
    );
    config.conversation_history = messages;
    config.conversation_history_schema_messages = schema_messages;
    Ok(())
}
