use relay_core::types::{ConversationKind, ParticipantRole};
use serde::{Deserialize, Serialize};

/// Canonical id for a direct conversation: `dm_<lo>_<hi>` with the user
/// ids in lexicographic order. Uniqueness of the pair rides on the primary
/// key over this id.
pub fn direct_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("dm_{}_{}", a, b)
    } else {
        format!("dm_{}_{}", b, a)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: bool,
    pub max_participants: u32,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    /// Non-null means soft-deleted: excluded from listings and access
    /// checks, retained until the cleanup reconciler purges it.
    pub deleted_at: Option<String>,
}

impl Conversation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    /// Deactivation revokes access but preserves the row for audit.
    pub active: bool,
    pub joined_at: String,
    pub last_read_at: Option<String>,
}

/// Request body for group creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    /// Members to add beyond the creator; duplicates and the creator
    /// itself are dropped.
    #[serde(default)]
    pub participant_ids: Vec<String>,
}

pub(crate) fn default_max_participants() -> u32 {
    100
}

/// Partial settings update: only present fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettingsPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub max_participants: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_id_is_order_independent() {
        assert_eq!(direct_id("u1", "u2"), "dm_u1_u2");
        assert_eq!(direct_id("u2", "u1"), "dm_u1_u2");
    }

    #[test]
    fn direct_id_orders_lexicographically() {
        assert_eq!(direct_id("zeta", "alpha"), "dm_alpha_zeta");
    }
}
