use relay_messages::MessageDraft;
use relay_protocol::frames::{to_wire, ChatFrame, ClientFrame, ErrorFrame, ReceiptFrame};
use relay_users::User;
use tracing::{debug, warn};

use crate::app::AppState;

/// Handle one inbound text frame. Returns a frame to send back, or None.
/// Malformed and rejected frames produce an error frame; the connection
/// stays open either way.
pub async fn handle_frame(state: &AppState, user: &User, text: &str) -> Option<String> {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(user_id = %user.id, error = %e, "malformed frame");
            return Some(to_wire(&ErrorFrame::new(format!("malformed frame: {e}"))));
        }
    };

    // any frame counts as activity
    if let Err(e) = state.connections.refresh(&user.id) {
        warn!(error = %e, "presence refresh failed");
    }

    match frame {
        ClientFrame::Heartbeat => {
            if let Err(e) = state.users.touch_last_seen(&user.id) {
                warn!(error = %e, "last-seen update failed");
            }
            None
        }
        ClientFrame::Receipt(receipt) => handle_receipt(state, user, receipt),
        ClientFrame::Chat(chat) => handle_chat(state, user, chat).await,
    }
}

fn handle_receipt(state: &AppState, user: &User, receipt: ReceiptFrame) -> Option<String> {
    // clients only report their own receipts
    if receipt.user_id != user.id {
        return Some(to_wire(&ErrorFrame::new("receipt user mismatch")));
    }
    let timestamp = receipt.timestamp.map(|t| t.to_rfc3339());
    if let Err(e) = state.receipts.mark(
        &receipt.message_id,
        &user.id,
        receipt.status_type,
        timestamp.as_deref(),
    ) {
        warn!(message_id = %receipt.message_id, error = %e, "receipt update failed");
        return Some(to_wire(&ErrorFrame::new("receipt update failed")));
    }
    None
}

async fn handle_chat(state: &AppState, user: &User, chat: ChatFrame) -> Option<String> {
    if chat.content.trim().is_empty() {
        return Some(to_wire(&ErrorFrame::new("message content must not be empty")));
    }
    if chat.sender_id != user.id {
        warn!(user_id = %user.id, claimed = %chat.sender_id, "sender mismatch on chat frame");
        return Some(to_wire(&ErrorFrame::new("sender does not match session")));
    }
    match state.conversations.has_access(&user.id, &chat.conversation_id) {
        Ok(true) => {}
        Ok(false) => {
            return Some(to_wire(&ErrorFrame::new("no access to this conversation")));
        }
        Err(e) => {
            warn!(error = %e, "access check failed");
            return Some(to_wire(&ErrorFrame::new("temporary failure, retry")));
        }
    }

    let mut draft = MessageDraft::text(
        &chat.conversation_id,
        &user.id,
        &user.display_name,
        chat.content.trim(),
    );
    draft.msg_type = chat.msg_type;

    // queued path; the ack arrives on fanout with the assigned id
    if let Err(e) = state.pipeline.submit(draft).await {
        warn!(error = %e, "pipeline submit failed");
        return Some(to_wire(&ErrorFrame::new("server overloaded, retry with backoff")));
    }
    None
}
