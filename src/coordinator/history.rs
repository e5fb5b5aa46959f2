//! Attaching chat history to chat-flow runs

use super::ExecutionCoordinator;
use crate::chat::prefetch_chat_history;
use crate::convert::{ConversionError, describe};
use crate::engine::Variables;
use crate::entity::ExecuteConfig;
use crate::error::Result;
use tracing::{debug, error, warn};

/// Input key naming the conversation a node-debug run belongs to
pub const CONVERSATION_NAME_KEY: &str = "CONVERSATION_NAME";

impl ExecutionCoordinator {
    /// Attach `rounds` rounds of conversation history to `config`
    ///
    /// With `by_name`, the conversation named by the input's
    /// [`CONVERSATION_NAME_KEY`] is resolved (or created) first. Only a bad
    /// conversation name or a failed conversation lookup is an error; a
    /// failed prefetch is logged.
    pub(super) async fn handle_history(
        &self,
        config: &mut ExecuteConfig,
        input: &Variables,
        rounds: u32,
        by_name: bool,
    ) -> Result<()> {
        let Some(chat) = self.chat.as_deref() else {
            warn!(workflow_id = config.id, "chat history needed but no chat service attached");
            return Ok(());
        };

        if by_name {
            if let Some(value) = input.get(CONVERSATION_NAME_KEY) {
                let name = value.as_str().ok_or_else(|| ConversionError::TypeMismatch {
                    path: CONVERSATION_NAME_KEY.to_string(),
                    expected: "string",
                    actual: describe(value),
                })?;
                let biz_id = config.biz_id().unwrap_or_default();
                let (conversation_id, section_id) = chat
                    .get_or_create_conversation(biz_id, config.connector_id, config.operator, name)
                    .await?;
                debug!(conversation_id, section_id, name, "resolved conversation by name");
                config.conversation_id = Some(conversation_id);
                config.section_id = Some(section_id);
            }
        }

        if let Err(e) = prefetch_chat_history(chat, config, rounds).await {
            error!(workflow_id = config.id, error = %e, "failed to prefetch chat history");
        }
        Ok(())
    }
}
