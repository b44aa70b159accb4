use std::str::FromStr;

use relay_core::types::{ConversationKind, ParticipantRole};
use rusqlite::{Connection, Result};

use crate::types::{Conversation, Participant};

pub(crate) const CONVERSATION_COLUMNS: &str =
    "id, kind, name, description, is_public, max_participants,
     created_by, created_at, updated_at, deleted_at";

/// Map a SELECT row (column order from CONVERSATION_COLUMNS).
pub(crate) fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let kind = ConversationKind::from_str(&row.get::<_, String>(1)?)
        .unwrap_or(ConversationKind::Group);
    Ok(Conversation {
        id: row.get(0)?,
        kind,
        name: row.get(2)?,
        description: row.get(3)?,
        is_public: row.get::<_, i32>(4)? != 0,
        max_participants: row.get::<_, u32>(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

pub(crate) const PARTICIPANT_COLUMNS: &str =
    "conversation_id, user_id, role, active, joined_at, last_read_at";

pub(crate) fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let role = ParticipantRole::from_str(&row.get::<_, String>(2)?).unwrap_or_default();
    Ok(Participant {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        role,
        active: row.get::<_, i32>(3)? != 0,
        joined_at: row.get(4)?,
        last_read_at: row.get(5)?,
    })
}

/// Initialise conversation tables. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                TEXT PRIMARY KEY NOT NULL,
            kind              TEXT NOT NULL,
            name              TEXT,
            description       TEXT,
            is_public         INTEGER NOT NULL DEFAULT 0,
            max_participants  INTEGER NOT NULL DEFAULT 100,
            created_by        TEXT NOT NULL,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            deleted_at        TEXT
        );
        CREATE TABLE IF NOT EXISTS conversation_participants (
            conversation_id   TEXT NOT NULL,
            user_id           TEXT NOT NULL,
            role              TEXT NOT NULL DEFAULT 'member',
            active            INTEGER NOT NULL DEFAULT 1,
            joined_at         TEXT NOT NULL,
            last_read_at      TEXT,
            PRIMARY KEY (conversation_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON conversation_participants (user_id, active);
        CREATE INDEX IF NOT EXISTS idx_conversations_deleted
            ON conversations (deleted_at);",
    )
}
