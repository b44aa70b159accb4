// Verify wire format matches what deployed clients send and expect.
// These tests ensure protocol compatibility is never broken.

use relay_core::types::ReceiptKind;
use relay_protocol::frames::{to_wire, AckFrame, ClientFrame, ErrorFrame};

#[test]
fn chat_frame_parses() {
    let json = r#"{"conversationId":"dm_u1_u2","senderId":"u1","senderUsername":"alice","content":"hello","type":"TEXT"}"#;
    match ClientFrame::parse(json).unwrap() {
        ClientFrame::Chat(chat) => {
            assert_eq!(chat.conversation_id, "dm_u1_u2");
            assert_eq!(chat.sender_id, "u1");
            assert_eq!(chat.sender_username.as_deref(), Some("alice"));
            assert_eq!(chat.content, "hello");
            assert_eq!(chat.msg_type, "TEXT");
        }
        other => panic!("expected chat frame, got {:?}", other),
    }
}

#[test]
fn chat_frame_type_defaults_to_text() {
    let json = r#"{"conversationId":"grp_1","senderId":"u1","content":"hi"}"#;
    match ClientFrame::parse(json).unwrap() {
        ClientFrame::Chat(chat) => assert_eq!(chat.msg_type, "TEXT"),
        other => panic!("expected chat frame, got {:?}", other),
    }
}

#[test]
fn receipt_frame_parses() {
    let json = r#"{"messageId":"m-1","userId":"u2","statusType":"READ","timestamp":"2026-07-01T12:00:00Z"}"#;
    match ClientFrame::parse(json).unwrap() {
        ClientFrame::Receipt(receipt) => {
            assert_eq!(receipt.message_id, "m-1");
            assert_eq!(receipt.user_id, "u2");
            assert_eq!(receipt.status_type, ReceiptKind::Read);
            assert!(receipt.timestamp.is_some());
        }
        other => panic!("expected receipt frame, got {:?}", other),
    }
}

#[test]
fn receipt_frame_delivered_without_timestamp() {
    let json = r#"{"messageId":"m-2","userId":"u3","statusType":"DELIVERED"}"#;
    match ClientFrame::parse(json).unwrap() {
        ClientFrame::Receipt(receipt) => {
            assert_eq!(receipt.status_type, ReceiptKind::Delivered);
            assert!(receipt.timestamp.is_none());
        }
        other => panic!("expected receipt frame, got {:?}", other),
    }
}

#[test]
fn heartbeat_parses() {
    let json = r#"{"type":"heartbeat"}"#;
    assert!(matches!(
        ClientFrame::parse(json).unwrap(),
        ClientFrame::Heartbeat
    ));
}

#[test]
fn unknown_shape_is_rejected_not_misread() {
    // has a "type" but no discriminating keys
    assert!(ClientFrame::parse(r#"{"type":"TEXT"}"#).is_err());
    assert!(ClientFrame::parse(r#"{"foo":1}"#).is_err());
    assert!(ClientFrame::parse(r#"[1,2,3]"#).is_err());
    assert!(ClientFrame::parse("not json").is_err());
}

#[test]
fn ack_serialization() {
    let json = to_wire(&AckFrame::new("m-42"));
    assert!(json.contains(r#""type":"ack""#));
    assert!(json.contains(r#""messageId":"m-42""#));
}

#[test]
fn error_serialization() {
    let json = to_wire(&ErrorFrame::new("no access"));
    assert!(json.contains(r#""type":"error""#));
    assert!(json.contains(r#""message":"no access""#));
}
