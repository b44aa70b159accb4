use chrono::{DateTime, Utc};
use relay_core::types::ReceiptKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("unrecognized frame shape")]
    UnknownShape,

    #[error("invalid frame: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Client → Server chat message draft.
/// Wire: `{ "conversationId": "...", "senderId": "...", "content": "hi", "type": "TEXT" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFrame {
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    pub content: String,
    #[serde(rename = "type", default = "default_msg_type")]
    pub msg_type: String,
}

fn default_msg_type() -> String {
    "TEXT".to_string()
}

/// Client → Server receipt update.
/// Wire: `{ "messageId": "...", "userId": "...", "statusType": "READ", "timestamp": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptFrame {
    pub message_id: String,
    pub user_id: String,
    pub status_type: ReceiptKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Every frame shape a client may send over the socket.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Chat(ChatFrame),
    Receipt(ReceiptFrame),
    Heartbeat,
}

impl ClientFrame {
    /// Classify a raw inbound frame by its discriminating fields, then
    /// deserialize the matching shape. The three shapes carry disjoint
    /// required keys, so inspection order is not load-bearing.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(obj) = value.as_object() else {
            return Err(FrameError::NotAnObject);
        };
        let is_heartbeat = obj.get("type").and_then(Value::as_str) == Some("heartbeat");
        let is_receipt = obj.contains_key("statusType");
        let is_chat = obj.contains_key("conversationId") && obj.contains_key("content");

        if is_heartbeat {
            Ok(ClientFrame::Heartbeat)
        } else if is_receipt {
            Ok(ClientFrame::Receipt(serde_json::from_value(value)?))
        } else if is_chat {
            Ok(ClientFrame::Chat(serde_json::from_value(value)?))
        } else {
            Err(FrameError::UnknownShape)
        }
    }
}

/// Server → Client acknowledgement that a message entered the pipeline.
/// Wire: `{ "type": "ack", "messageId": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub message_id: String,
}

impl AckFrame {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            frame_type: "ack".to_string(),
            message_id: message_id.into(),
        }
    }
}

/// Server → Client error notice. Does not close the connection.
/// Wire: `{ "type": "error", "message": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub message: String,
}

impl ErrorFrame {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            frame_type: "error".to_string(),
            message: message.into(),
        }
    }
}

/// Serialize an outbound frame, falling back to an empty object on the
/// (unreachable for our own types) serialization failure.
pub fn to_wire<T: Serialize>(frame: &T) -> String {
    serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string())
}
