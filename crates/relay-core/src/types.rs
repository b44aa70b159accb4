use serde::{Deserialize, Serialize};

/// Two-party or multi-party container for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationKind::Direct => write!(f, "direct"),
            ConversationKind::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ConversationKind::Direct),
            "group" => Ok(ConversationKind::Group),
            other => Err(format!("unknown conversation kind: {}", other)),
        }
    }
}

/// Role of a participant within a group conversation. Direct conversations
/// only ever hold Member rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl ParticipantRole {
    /// Owners and admins may add or remove participants.
    pub fn can_manage_participants(&self) -> bool {
        matches!(self, ParticipantRole::Owner | ParticipantRole::Admin)
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantRole::Owner => write!(f, "owner"),
            ParticipantRole::Admin => write!(f, "admin"),
            ParticipantRole::Member => write!(f, "member"),
        }
    }
}

impl std::str::FromStr for ParticipantRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "owner" => Ok(ParticipantRole::Owner),
            "admin" => Ok(ParticipantRole::Admin),
            "member" => Ok(ParticipantRole::Member),
            other => Err(format!("unknown participant role: {}", other)),
        }
    }
}

/// Author-visible aggregate over the per-recipient receipt vectors.
///
/// Read means every active non-sender participant at send time has read the
/// message; Delivered means every one of them has at least received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Sent => write!(f, "sent"),
            MessageStatus::Delivered => write!(f, "delivered"),
            MessageStatus::Read => write!(f, "read"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(format!("unknown message status: {}", other)),
        }
    }
}

/// The two receipt transitions a recipient can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn role_round_trip() {
        for role in [
            ParticipantRole::Owner,
            ParticipantRole::Admin,
            ParticipantRole::Member,
        ] {
            assert_eq!(ParticipantRole::from_str(&role.to_string()).unwrap(), role);
        }
    }

    #[test]
    fn member_cannot_manage() {
        assert!(!ParticipantRole::Member.can_manage_participants());
        assert!(ParticipantRole::Admin.can_manage_participants());
        assert!(ParticipantRole::Owner.can_manage_participants());
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, r#""DELIVERED""#);
    }
}
