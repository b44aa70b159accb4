use relay_messages::Message;
use relay_protocol::frames::{to_wire, AckFrame};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::AppState;

/// Consume distribution events from the pipeline and forward each message
/// to the live connections of its conversation's participants on this
/// instance. The sender additionally receives an ack carrying the
/// assigned message id.
///
/// Per-connection send failures are logged inside the fanout and never
/// abort the remainder.
pub async fn run_distribution(mut events: mpsc::Receiver<Message>, state: Arc<AppState>) {
    info!("distribution handler started");
    while let Some(message) = events.recv().await {
        let participants = match state.conversations.participant_ids(&message.conversation_id) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "participant resolution failed, skipping fanout"
                );
                continue;
            }
        };

        let payload = to_wire(&message);
        let delivered = state.connections.fanout(&participants, &payload).await;
        debug!(message_id = %message.id, delivered, "message fanned out");

        let ack = to_wire(&AckFrame::new(&message.id));
        state
            .connections
            .fanout(std::slice::from_ref(&message.sender_id), &ack)
            .await;
    }
    info!("distribution handler stopped");
}
