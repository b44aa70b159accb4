use std::sync::Arc;

use chrono::Utc;
use relay_conversations::ConversationManager;
use relay_core::types::MessageStatus;
use relay_messages::{Message, MessageDraft, MessageStore};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Executes the per-message steps: default the status, seed the delivered
/// vector, persist, emit the distribution event. Shared by the worker task
/// and the synchronous fallback path.
pub struct MessageProcessor {
    conversations: Arc<ConversationManager>,
    messages: Arc<MessageStore>,
    distribution: mpsc::Sender<Message>,
}

impl MessageProcessor {
    pub fn new(
        conversations: Arc<ConversationManager>,
        messages: Arc<MessageStore>,
        distribution: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            conversations,
            messages,
            distribution,
        }
    }

    /// Process one draft to completion. Returns the persisted message.
    ///
    /// Participant enumeration failures are logged and leave the
    /// delivered vector partial; persistence still proceeds. Only a store
    /// failure aborts.
    pub async fn process(
        &self,
        mut draft: MessageDraft,
    ) -> Result<Message, relay_messages::MessageError> {
        if draft.status.is_none() {
            draft.status = Some(MessageStatus::Sent);
        }

        let now = Utc::now().to_rfc3339();
        match self.conversations.participant_ids(&draft.conversation_id) {
            Ok(participants) => {
                for uid in participants {
                    if uid != draft.sender_id {
                        draft.delivered_to.entry(uid).or_insert_with(|| now.clone());
                    }
                }
            }
            Err(e) => {
                warn!(
                    conversation_id = %draft.conversation_id,
                    error = %e,
                    "participant enumeration failed, delivered vector left partial"
                );
            }
        }

        let message = self.messages.insert(&draft)?;

        if self.distribution.send(message.clone()).await.is_err() {
            warn!(message_id = %message.id, "distribution channel closed, fanout skipped");
        } else {
            debug!(message_id = %message.id, "distribution event emitted");
        }

        Ok(message)
    }
}
