use serde::{Deserialize, Serialize};

/// Full user record. The password hash rides along for credential checks
/// but is never serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// UUIDv7, time-sortable.
    pub id: String,
    /// Unique, case-sensitive.
    pub username: String,
    /// Unique, normalized to lowercase on write.
    pub email: String,
    /// Argon2id PHC string.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: String,
    pub created_at: String,
    pub updated_at: String,
}
