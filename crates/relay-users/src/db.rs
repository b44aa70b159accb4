use rusqlite::{Connection, Result};

use crate::types::User;

/// Map a SELECT row (column order from USER_COLUMNS) to a User.
/// Centralised here so every query in this crate stays consistent.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        display_name: row.get(4)?,
        avatar_url: row.get(5)?,
        online: row.get::<_, i32>(6)? != 0,
        last_seen_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, password_hash, display_name, avatar_url,
     online, last_seen_at, created_at, updated_at";

/// Initialise the users table. Safe to call on every startup; CREATE IF
/// NOT EXISTS makes it idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id             TEXT PRIMARY KEY NOT NULL,
            username       TEXT NOT NULL UNIQUE,
            email          TEXT NOT NULL UNIQUE,
            password_hash  TEXT NOT NULL,
            display_name   TEXT NOT NULL,
            avatar_url     TEXT,
            online         INTEGER NOT NULL DEFAULT 0,
            last_seen_at   TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_email ON users (email);",
    )
}
