use std::collections::BTreeMap;

use relay_core::types::MessageStatus;
use serde::{Deserialize, Serialize};

/// A persisted message. Serializes directly as the outbound wire frame.
///
/// The receipt vectors map recipient user id to an RFC3339 instant. The
/// sender never appears in either, and read implies delivered per user;
/// both are upheld by the store's receipt application, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned on insert (UUIDv7, time-sortable).
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Display-name snapshot taken at send time; later profile renames do
    /// not rewrite history.
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Author-visible aggregate, kept in step with the vectors.
    pub status: MessageStatus,
    pub delivered_to: BTreeMap<String, String>,
    pub read_by: BTreeMap<String, String>,
    pub created_at: String,
}

impl Message {
    /// The recipient set this message was addressed to: everyone who ever
    /// appeared in a vector. The pipeline seeds `delivered_to` with the
    /// active non-sender participants at send time, so this reconstructs
    /// that snapshot.
    pub fn recipients(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .delivered_to
            .keys()
            .chain(self.read_by.keys())
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Aggregate over the vectors: Read when every recipient has read,
    /// Delivered when every recipient has at least received, Sent
    /// otherwise (including the no-recipients case).
    pub fn aggregate_status(&self) -> MessageStatus {
        let recipients = self.recipients();
        if recipients.is_empty() {
            return MessageStatus::Sent;
        }
        if recipients.iter().all(|r| self.read_by.contains_key(*r)) {
            return MessageStatus::Read;
        }
        if recipients.iter().all(|r| self.delivered_to.contains_key(*r)) {
            return MessageStatus::Delivered;
        }
        MessageStatus::Sent
    }
}

/// What a producer hands the pipeline; everything else is filled in during
/// processing and persistence.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub msg_type: String,
    pub status: Option<MessageStatus>,
    /// Seeded by the pipeline before persistence.
    pub delivered_to: BTreeMap<String, String>,
}

impl MessageDraft {
    pub fn text(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            content: content.into(),
            msg_type: "TEXT".to_string(),
            status: None,
            delivered_to: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(delivered: &[&str], read: &[&str]) -> Message {
        Message {
            id: "m-1".into(),
            conversation_id: "grp_1".into(),
            sender_id: "u-1".into(),
            sender_name: "alice".into(),
            content: "hi".into(),
            msg_type: "TEXT".into(),
            status: MessageStatus::Sent,
            delivered_to: delivered
                .iter()
                .map(|u| (u.to_string(), "2026-07-01T00:00:00+00:00".to_string()))
                .collect(),
            read_by: read
                .iter()
                .map(|u| (u.to_string(), "2026-07-01T00:00:01+00:00".to_string()))
                .collect(),
            created_at: "2026-07-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn aggregate_is_sent_without_recipients() {
        assert_eq!(message(&[], &[]).aggregate_status(), MessageStatus::Sent);
    }

    #[test]
    fn aggregate_is_delivered_until_everyone_reads() {
        let m = message(&["u-2", "u-3"], &["u-2"]);
        assert_eq!(m.aggregate_status(), MessageStatus::Delivered);
    }

    #[test]
    fn aggregate_is_read_when_all_read() {
        let m = message(&["u-2", "u-3"], &["u-2", "u-3"]);
        assert_eq!(m.aggregate_status(), MessageStatus::Read);
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let json = serde_json::to_string(&message(&["u-2"], &[])).unwrap();
        assert!(json.contains(r#""conversationId":"grp_1""#));
        assert!(json.contains(r#""deliveredTo":{"u-2""#));
        assert!(json.contains(r#""type":"TEXT""#));
        assert!(json.contains(r#""status":"SENT""#));
    }
}
