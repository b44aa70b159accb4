use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use relay_core::types::ReceiptKind;
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MessageError, Result};
use crate::types::{Message, MessageDraft};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, sender_name, content, msg_type,
     status, delivered_to, read_by, created_at";

/// Thread-safe store for the messages collection.
///
/// Writes are single-document; nothing here spans conversations, which is
/// what lets the cleanup reconciler work conversation-by-conversation.
pub struct MessageStore {
    db: Mutex<Connection>,
}

impl MessageStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Persist a draft. The store assigns the id and timestamp; the
    /// delivered vector arrives pre-seeded from the pipeline.
    pub fn insert(&self, draft: &MessageDraft) -> Result<Message> {
        let message = Message {
            id: Uuid::now_v7().to_string(),
            conversation_id: draft.conversation_id.clone(),
            sender_id: draft.sender_id.clone(),
            sender_name: draft.sender_name.clone(),
            content: draft.content.clone(),
            msg_type: draft.msg_type.clone(),
            status: draft.status.unwrap_or_default(),
            delivered_to: draft.delivered_to.clone(),
            read_by: BTreeMap::new(),
            created_at: Utc::now().to_rfc3339(),
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (id, conversation_id, sender_id, sender_name, content, msg_type,
              status, delivered_to, read_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.sender_name,
                message.content,
                message.msg_type,
                message.status.to_string(),
                serde_json::to_string(&message.delivered_to)?,
                serde_json::to_string(&message.read_by)?,
                message.created_at,
            ],
        )?;
        db.execute(
            "INSERT INTO messages_fts(rowid, content)
             VALUES (last_insert_rowid(), ?1)",
            params![message.content],
        )?;

        debug!(message_id = %message.id, conversation_id = %message.conversation_id, "message persisted");
        Ok(message)
    }

    pub fn get(&self, message_id: &str) -> Result<Option<Message>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![message_id],
            row_to_message,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MessageError::Database(e)),
        }
    }

    /// Conversation history, oldest first, optionally starting after a
    /// `since` timestamp.
    pub fn list_conversation(
        &self,
        conversation_id: &str,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let rows = match since {
            Some(since) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1 AND created_at > ?2
                     ORDER BY created_at, id LIMIT ?3"
                ))?;
                let rows =
                    stmt.query_map(params![conversation_id, since, limit as i64], row_to_message)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at, id LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![conversation_id, limit as i64], row_to_message)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    /// Apply a receipt transition. Monotonic and idempotent: vectors only
    /// grow, a read always implies a delivered entry for the same user,
    /// and replays change nothing. The stored aggregate is recomputed in
    /// the same update.
    pub fn apply_receipt(
        &self,
        message_id: &str,
        user_id: &str,
        kind: ReceiptKind,
        at: &str,
    ) -> Result<Message> {
        let mut message = self
            .get(message_id)?
            .ok_or_else(|| MessageError::NotFound(message_id.to_string()))?;

        let mut changed = false;
        if !message.delivered_to.contains_key(user_id) {
            message
                .delivered_to
                .insert(user_id.to_string(), at.to_string());
            changed = true;
        }
        if kind == ReceiptKind::Read && !message.read_by.contains_key(user_id) {
            message.read_by.insert(user_id.to_string(), at.to_string());
            changed = true;
        }
        if !changed {
            return Ok(message);
        }

        message.status = message.aggregate_status();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE messages SET delivered_to = ?2, read_by = ?3, status = ?4
             WHERE id = ?1",
            params![
                message.id,
                serde_json::to_string(&message.delivered_to)?,
                serde_json::to_string(&message.read_by)?,
                message.status.to_string(),
            ],
        )?;
        Ok(message)
    }

    /// Messages in a conversation not sent by `user_id` and not yet read
    /// by them. Feed for the conversation-wide read sweep.
    pub fn unread_for_user(&self, conversation_id: &str, user_id: &str) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND sender_id != ?2
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![conversation_id, user_id], row_to_message)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|m| !m.read_by.contains_key(user_id))
            .collect())
    }

    /// Count of foreign messages newer than `after`; the unread badge.
    pub fn count_since(
        &self,
        conversation_id: &str,
        user_id: &str,
        after: Option<&str>,
    ) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: u64 = match after {
            Some(after) => db.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND created_at > ?3",
                params![conversation_id, user_id, after],
                |row| row.get(0),
            )?,
            None => db.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND sender_id != ?2",
                params![conversation_id, user_id],
                |row| row.get(0),
            )?,
        };
        Ok(count)
    }

    /// Ranked full-text search within one conversation. The query is
    /// matched as a phrase; FTS syntax in user input has no effect.
    pub fn search_text(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let phrase = format!("\"{}\"", query.replace('"', " "));
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT m.id, m.conversation_id, m.sender_id, m.sender_name, m.content, m.msg_type,
             m.status, m.delivered_to, m.read_by, m.created_at FROM messages m
             JOIN messages_fts f ON m.rowid = f.rowid
             WHERE m.conversation_id = ?1 AND messages_fts MATCH ?2
             ORDER BY rank
             LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![conversation_id, phrase, limit as i64, offset as i64],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Newest-first scan of a conversation, capped. Fallback path for
    /// regex search and the candidate pool for in-memory filtering.
    pub fn scan_conversation(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All messages in `[from, to]`, oldest first. Context-window feed.
    pub fn list_window(
        &self,
        conversation_id: &str,
        from: &str,
        to: &str,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1 AND created_at >= ?2 AND created_at <= ?3
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![conversation_id, from, to], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Remove every message of a conversation, returning the count.
    /// Cascade-delete and reconciler path.
    pub fn delete_conversation_messages(&self, conversation_id: &str) -> Result<u64> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO messages_fts(messages_fts, rowid, content)
             SELECT 'delete', rowid, content FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
        debug!(conversation_id, deleted, "conversation messages purged");
        Ok(deleted as u64)
    }

    /// Distinct conversation ids referenced by any message. The reconciler
    /// diffs this against the live set to find orphans.
    pub fn referenced_conversation_ids(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT DISTINCT conversation_id FROM messages")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_for_conversation(&self, conversation_id: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let count: u64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Map a SELECT row (column order from MESSAGE_COLUMNS) to a Message.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    use std::str::FromStr;
    let status = relay_core::types::MessageStatus::from_str(&row.get::<_, String>(6)?)
        .unwrap_or_default();
    let delivered_to: BTreeMap<String, String> =
        serde_json::from_str(&row.get::<_, String>(7)?).unwrap_or_default();
    let read_by: BTreeMap<String, String> =
        serde_json::from_str(&row.get::<_, String>(8)?).unwrap_or_default();
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        msg_type: row.get(5)?,
        status,
        delivered_to,
        read_by,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use relay_core::types::MessageStatus;

    fn store() -> MessageStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MessageStore::new(conn)
    }

    fn draft(conversation: &str, sender: &str, content: &str) -> MessageDraft {
        MessageDraft::text(conversation, sender, sender, content)
    }

    #[test]
    fn insert_assigns_id_and_timestamp() {
        let store = store();
        let m = store.insert(&draft("grp_1", "u-1", "hello")).unwrap();
        assert!(!m.id.is_empty());
        assert_eq!(m.status, MessageStatus::Sent);
        assert!(m.read_by.is_empty());
        assert_eq!(store.get(&m.id).unwrap().unwrap().content, "hello");
    }

    #[test]
    fn receipts_are_monotonic_and_idempotent() {
        let store = store();
        let mut d = draft("grp_1", "u-1", "hello");
        d.delivered_to
            .insert("u-2".into(), "2026-07-01T00:00:00+00:00".into());
        let m = store.insert(&d).unwrap();

        let now = Utc::now().to_rfc3339();
        let after_read = store
            .apply_receipt(&m.id, "u-2", ReceiptKind::Read, &now)
            .unwrap();
        assert!(after_read.delivered_to.contains_key("u-2"));
        assert!(after_read.read_by.contains_key("u-2"));
        assert_eq!(after_read.status, MessageStatus::Read);

        // replaying the delivered transition cannot unset the read flag
        let replay = store
            .apply_receipt(&m.id, "u-2", ReceiptKind::Delivered, &now)
            .unwrap();
        assert!(replay.read_by.contains_key("u-2"));
        assert_eq!(replay.status, MessageStatus::Read);
    }

    #[test]
    fn read_implies_delivered_for_unseen_user() {
        let store = store();
        let m = store.insert(&draft("grp_1", "u-1", "hello")).unwrap();
        let now = Utc::now().to_rfc3339();
        let updated = store
            .apply_receipt(&m.id, "u-3", ReceiptKind::Read, &now)
            .unwrap();
        assert!(updated.delivered_to.contains_key("u-3"));
        assert!(updated.read_by.contains_key("u-3"));
    }

    #[test]
    fn history_is_ascending_and_since_filters() {
        let store = store();
        let m1 = store.insert(&draft("grp_1", "u-1", "one")).unwrap();
        let m2 = store.insert(&draft("grp_1", "u-1", "two")).unwrap();
        store.insert(&draft("grp_other", "u-1", "noise")).unwrap();

        let all = store.list_conversation("grp_1", None, 100).unwrap();
        assert_eq!(
            all.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );

        let after = store
            .list_conversation("grp_1", Some(&m1.created_at), 100)
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, m2.id);
    }

    #[test]
    fn fts_finds_phrase_and_ignores_other_conversations() {
        let store = store();
        store.insert(&draft("grp_1", "u-1", "deploy the relay gateway")).unwrap();
        store.insert(&draft("grp_1", "u-1", "unrelated chatter")).unwrap();
        store.insert(&draft("grp_2", "u-1", "relay gateway elsewhere")).unwrap();

        let hits = store.search_text("grp_1", "relay gateway", 20, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "deploy the relay gateway");
    }

    #[test]
    fn fts_survives_quote_injection() {
        let store = store();
        store.insert(&draft("grp_1", "u-1", "plain text")).unwrap();
        // embedded quotes must not produce an FTS syntax error
        let hits = store.search_text("grp_1", "pla\"in", 20, 0).unwrap();
        assert!(hits.is_empty() || hits[0].content == "plain text");
    }

    #[test]
    fn purge_removes_only_the_target_conversation() {
        let store = store();
        store.insert(&draft("grp_1", "u-1", "a")).unwrap();
        store.insert(&draft("grp_1", "u-1", "b")).unwrap();
        store.insert(&draft("grp_2", "u-1", "keep")).unwrap();

        assert_eq!(store.delete_conversation_messages("grp_1").unwrap(), 2);
        assert_eq!(store.count_for_conversation("grp_1").unwrap(), 0);
        assert_eq!(store.count_for_conversation("grp_2").unwrap(), 1);
        assert_eq!(store.referenced_conversation_ids().unwrap(), vec!["grp_2"]);
    }

    #[test]
    fn unread_excludes_own_and_read_messages() {
        let store = store();
        let foreign = store.insert(&draft("grp_1", "u-1", "from alice")).unwrap();
        store.insert(&draft("grp_1", "u-2", "own message")).unwrap();
        let seen = store.insert(&draft("grp_1", "u-1", "already read")).unwrap();
        let now = Utc::now().to_rfc3339();
        store
            .apply_receipt(&seen.id, "u-2", ReceiptKind::Read, &now)
            .unwrap();

        let unread = store.unread_for_user("grp_1", "u-2").unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, foreign.id);
    }
}
