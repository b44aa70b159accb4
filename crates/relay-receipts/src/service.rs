use std::sync::Arc;

use chrono::Utc;
use relay_conversations::ConversationManager;
use relay_core::types::{MessageStatus, ReceiptKind};
use relay_messages::MessageStore;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("message store error: {0}")]
    Messages(#[from] relay_messages::MessageError),

    #[error("conversation store error: {0}")]
    Conversations(#[from] relay_conversations::ConversationError),
}

pub type Result<T> = std::result::Result<T, ReceiptError>;

/// One receipt transition, as carried by the wire frame or a batch call.
#[derive(Debug, Clone)]
pub struct ReceiptUpdate {
    pub message_id: String,
    pub user_id: String,
    pub kind: ReceiptKind,
    /// Client-reported instant; server time is used when absent.
    pub timestamp: Option<String>,
}

pub struct ReceiptService {
    messages: Arc<MessageStore>,
    conversations: Arc<ConversationManager>,
}

impl ReceiptService {
    pub fn new(messages: Arc<MessageStore>, conversations: Arc<ConversationManager>) -> Self {
        Self {
            messages,
            conversations,
        }
    }

    pub fn mark_delivered(&self, message_id: &str, user_id: &str) -> Result<()> {
        self.mark(message_id, user_id, ReceiptKind::Delivered, None)
    }

    /// Read implies delivered; both flags land in one store update.
    pub fn mark_read(&self, message_id: &str, user_id: &str) -> Result<()> {
        self.mark(message_id, user_id, ReceiptKind::Read, None)
    }

    /// Apply one transition. Unknown messages, the sender's own messages,
    /// and users without access all no-op successfully.
    pub fn mark(
        &self,
        message_id: &str,
        user_id: &str,
        kind: ReceiptKind,
        timestamp: Option<&str>,
    ) -> Result<()> {
        let Some(message) = self.messages.get(message_id)? else {
            debug!(message_id, user_id, "receipt for unknown message, ignoring");
            return Ok(());
        };
        if message.sender_id == user_id {
            return Ok(());
        }
        if !self
            .conversations
            .has_access(user_id, &message.conversation_id)?
        {
            warn!(
                message_id,
                user_id,
                conversation_id = %message.conversation_id,
                "receipt denied: no conversation access"
            );
            return Ok(());
        }

        let at = timestamp
            .map(String::from)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        self.messages.apply_receipt(message_id, user_id, kind, &at)?;
        Ok(())
    }

    /// Sweep every unread foreign message in the conversation to read and
    /// bump the participant's last-read mark. Returns how many messages
    /// transitioned.
    pub fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        if !self.conversations.has_access(user_id, conversation_id)? {
            warn!(
                conversation_id,
                user_id, "conversation read sweep denied: no access"
            );
            return Ok(0);
        }

        let unread = self.messages.unread_for_user(conversation_id, user_id)?;
        let now = Utc::now().to_rfc3339();
        let mut updated = 0u64;
        for message in &unread {
            self.messages
                .apply_receipt(&message.id, user_id, ReceiptKind::Read, &now)?;
            updated += 1;
        }
        self.conversations.set_last_read(conversation_id, user_id)?;
        debug!(conversation_id, user_id, updated, "conversation marked read");
        Ok(updated)
    }

    /// Apply a batch of transitions. One bad update never blocks the rest;
    /// failures are logged with their message id and skipped.
    pub fn batch_update(&self, updates: &[ReceiptUpdate]) {
        for update in updates {
            if let Err(e) = self.mark(
                &update.message_id,
                &update.user_id,
                update.kind,
                update.timestamp.as_deref(),
            ) {
                warn!(message_id = %update.message_id, error = %e, "receipt update failed");
            }
        }
    }

    /// Aggregate status as seen by `viewer`. Only the sender sees the real
    /// aggregate; everyone else gets Sent so foreign delivery information
    /// never leaks.
    pub fn status_for(&self, message_id: &str, viewer: &str) -> Result<Option<MessageStatus>> {
        let Some(message) = self.messages.get(message_id)? else {
            return Ok(None);
        };
        if message.sender_id == viewer {
            Ok(Some(message.aggregate_status()))
        } else {
            Ok(Some(MessageStatus::Sent))
        }
    }
}
