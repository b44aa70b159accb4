use rusqlite::{Connection, Result};

/// Initialise the messages collection. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_messages_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY NOT NULL,
            conversation_id  TEXT NOT NULL,
            sender_id        TEXT NOT NULL,
            sender_name      TEXT NOT NULL,
            content          TEXT NOT NULL,
            msg_type         TEXT NOT NULL DEFAULT 'TEXT',
            status           TEXT NOT NULL DEFAULT 'sent',
            delivered_to     TEXT NOT NULL DEFAULT '{}',  -- JSON: user id -> instant
            read_by          TEXT NOT NULL DEFAULT '{}',  -- JSON: user id -> instant
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, created_at);",
    )
}

/// FTS5 virtual table over message content. content='' external-content
/// style — we sync manually on insert and delete.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(content, content='messages');",
    )
}
