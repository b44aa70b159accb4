use std::sync::{Arc, Mutex};

use chrono::Utc;
use relay_core::types::{ConversationKind, ParticipantRole};
use relay_users::UserStore;
use rusqlite::{params, Connection};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{
    row_to_conversation, row_to_participant, CONVERSATION_COLUMNS, PARTICIPANT_COLUMNS,
};
use crate::error::{ConversationError, Result};
use crate::types::{direct_id, Conversation, GroupSettingsPatch, GroupSpec, Participant};

/// Thread-safe manager for conversations and their participant rows.
///
/// Holds the user store for membership validation; conversations and users
/// live in the same relational store but reference each other by opaque id
/// only.
pub struct ConversationManager {
    db: Mutex<Connection>,
    users: Arc<UserStore>,
}

impl ConversationManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, users: Arc<UserStore>) -> Self {
        Self {
            db: Mutex::new(conn),
            users,
        }
    }

    /// Create or return the direct conversation between `a` and `b`.
    ///
    /// The canonical id makes this idempotent across argument order and
    /// across racing callers: the second inserter loses on the primary key
    /// and reads the winner's row back inside the same transaction.
    pub fn create_direct(&self, a: &str, b: &str) -> Result<Conversation> {
        if a == b {
            return Err(ConversationError::Validation(
                "direct conversation requires two distinct users".into(),
            ));
        }
        for uid in [a, b] {
            if self.users.get(uid)?.is_none() {
                return Err(ConversationError::ParticipantNotFound(uid.to_string()));
            }
        }

        let id = direct_id(a, b);
        let now = Utc::now().to_rfc3339();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO conversations
             (id, kind, is_public, max_participants, created_by, created_at, updated_at)
             VALUES (?1, 'direct', 0, 2, ?2, ?3, ?3)",
            params![id, a, now],
        )?;
        if inserted > 0 {
            for uid in [a, b] {
                tx.execute(
                    "INSERT INTO conversation_participants
                     (conversation_id, user_id, role, active, joined_at)
                     VALUES (?1, ?2, 'member', 1, ?3)",
                    params![id, uid, now],
                )?;
            }
            debug!(conversation_id = %id, "direct conversation created");
        }

        let conversation = tx.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )?;
        tx.commit()?;
        Ok(conversation)
    }

    /// Create a group conversation with `creator` as owner.
    ///
    /// Requested participants are deduplicated and the creator excluded;
    /// any unknown id fails the whole transaction.
    pub fn create_group(&self, creator: &str, spec: &GroupSpec) -> Result<Conversation> {
        if spec.name.trim().is_empty() {
            return Err(ConversationError::Validation("group name is required".into()));
        }
        if spec.max_participants == 0 {
            return Err(ConversationError::Validation(
                "participant cap must be at least 1".into(),
            ));
        }
        if self.users.get(creator)?.is_none() {
            return Err(ConversationError::ParticipantNotFound(creator.to_string()));
        }

        let mut members: Vec<String> = spec
            .participant_ids
            .iter()
            .filter(|id| id.as_str() != creator)
            .cloned()
            .collect();
        members.sort();
        members.dedup();

        for uid in &members {
            if self.users.get(uid)?.is_none() {
                return Err(ConversationError::ParticipantNotFound(uid.clone()));
            }
        }
        let total = members.len() as u32 + 1;
        if total > spec.max_participants {
            return Err(ConversationError::CapacityExceeded {
                active: total,
                cap: spec.max_participants,
            });
        }

        let id = format!("grp_{}", Uuid::new_v4().simple());
        let now = Utc::now().to_rfc3339();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO conversations
             (id, kind, name, description, is_public, max_participants,
              created_by, created_at, updated_at)
             VALUES (?1, 'group', ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id,
                spec.name,
                spec.description,
                spec.is_public as i32,
                spec.max_participants,
                creator,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO conversation_participants
             (conversation_id, user_id, role, active, joined_at)
             VALUES (?1, ?2, 'owner', 1, ?3)",
            params![id, creator, now],
        )?;
        for uid in &members {
            tx.execute(
                "INSERT INTO conversation_participants
                 (conversation_id, user_id, role, active, joined_at)
                 VALUES (?1, ?2, 'member', 1, ?3)",
                params![id, uid, now],
            )?;
        }

        let conversation = tx.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        )?;
        tx.commit()?;

        info!(conversation_id = %id, members = members.len() + 1, "group created");
        Ok(conversation)
    }

    /// Load a conversation regardless of soft-delete state.
    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![id],
            row_to_conversation,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConversationError::Database(e)),
        }
    }

    /// All live (non-tombstoned) conversations the user actively belongs
    /// to, most recently updated first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.list_filtered(user_id, None)
    }

    pub fn list_for_user_by_kind(
        &self,
        user_id: &str,
        kind: ConversationKind,
    ) -> Result<Vec<Conversation>> {
        self.list_filtered(user_id, Some(kind))
    }

    /// Role of an *active* participant; inactive rows act as absent.
    pub fn role_of(&self, conversation_id: &str, user_id: &str) -> Result<Option<ParticipantRole>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT role FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id = ?2 AND active = 1",
            params![conversation_id, user_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(s) => Ok(s.parse().ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConversationError::Database(e)),
        }
    }

    /// Active membership in a live conversation.
    pub fn has_access(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        match self.get(conversation_id)? {
            Some(c) if !c.is_deleted() => Ok(self.role_of(conversation_id, user_id)?.is_some()),
            _ => Ok(false),
        }
    }

    pub fn can_manage_participants(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        Ok(self
            .role_of(conversation_id, user_id)?
            .is_some_and(|r| r.can_manage_participants()))
    }

    pub fn can_update_settings(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        self.can_manage_participants(user_id, conversation_id)
    }

    pub fn is_owner(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        Ok(self.role_of(conversation_id, user_id)? == Some(ParticipantRole::Owner))
    }

    /// Apply only the fields present in the patch. Shrinking the cap below
    /// the current active count is rejected.
    pub fn update_group_settings(
        &self,
        conversation_id: &str,
        actor: &str,
        patch: &GroupSettingsPatch,
    ) -> Result<Conversation> {
        let conversation = self.require_live(conversation_id)?;
        if conversation.kind != ConversationKind::Group {
            return Err(ConversationError::OperationNotAllowed(
                "direct conversations carry no settings".into(),
            ));
        }
        if !self.can_update_settings(actor, conversation_id)? {
            return Err(ConversationError::NotAuthorized(
                "owner or admin role required".into(),
            ));
        }

        if let Some(cap) = patch.max_participants {
            if cap == 0 {
                return Err(ConversationError::Validation(
                    "participant cap must be at least 1".into(),
                ));
            }
            let active = self.active_count(conversation_id)?;
            if active > cap {
                return Err(ConversationError::CapacityExceeded { active, cap });
            }
        }

        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            if let Some(name) = &patch.name {
                db.execute(
                    "UPDATE conversations SET name = ?2, updated_at = ?3 WHERE id = ?1",
                    params![conversation_id, name, now],
                )?;
            }
            if let Some(description) = &patch.description {
                db.execute(
                    "UPDATE conversations SET description = ?2, updated_at = ?3 WHERE id = ?1",
                    params![conversation_id, description, now],
                )?;
            }
            if let Some(is_public) = patch.is_public {
                db.execute(
                    "UPDATE conversations SET is_public = ?2, updated_at = ?3 WHERE id = ?1",
                    params![conversation_id, is_public as i32, now],
                )?;
            }
            if let Some(cap) = patch.max_participants {
                db.execute(
                    "UPDATE conversations SET max_participants = ?2, updated_at = ?3 WHERE id = ?1",
                    params![conversation_id, cap, now],
                )?;
            }
        }
        self.require_live(conversation_id)
    }

    /// Add (or reactivate) a member. Idempotent for already-active rows.
    pub fn add_user(&self, conversation_id: &str, actor: &str, user_id: &str) -> Result<()> {
        let conversation = self.require_live(conversation_id)?;
        if conversation.kind == ConversationKind::Direct {
            return Err(ConversationError::OperationNotAllowed(
                "direct conversations have fixed membership".into(),
            ));
        }
        if !self.can_manage_participants(actor, conversation_id)? {
            return Err(ConversationError::NotAuthorized(
                "owner or admin role required".into(),
            ));
        }

        let existing = self.participant_row(conversation_id, user_id)?;
        if let Some(row) = existing {
            if row.active {
                return Ok(());
            }
            // Reactivation keeps joined_at and last_read_at for audit.
            if self.active_count(conversation_id)? >= conversation.max_participants {
                return Err(ConversationError::CapacityExceeded {
                    active: self.active_count(conversation_id)?,
                    cap: conversation.max_participants,
                });
            }
            let db = self.db.lock().unwrap();
            db.execute(
                "UPDATE conversation_participants SET active = 1
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
            )?;
            return Ok(());
        }

        if self.users.get(user_id)?.is_none() {
            return Err(ConversationError::ParticipantNotFound(user_id.to_string()));
        }
        if self.active_count(conversation_id)? >= conversation.max_participants {
            return Err(ConversationError::CapacityExceeded {
                active: self.active_count(conversation_id)?,
                cap: conversation.max_participants,
            });
        }

        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_participants
             (conversation_id, user_id, role, active, joined_at)
             VALUES (?1, ?2, 'member', 1, ?3)",
            params![conversation_id, user_id, now],
        )?;
        debug!(conversation_id, user_id, "participant added");
        Ok(())
    }

    /// Soft removal: the row stays (history, last_read_at) but access is
    /// revoked. Members may remove themselves; owners must transfer the
    /// role before leaving.
    pub fn remove_user(&self, conversation_id: &str, actor: &str, user_id: &str) -> Result<()> {
        let conversation = self.require_live(conversation_id)?;
        if conversation.kind == ConversationKind::Direct {
            return Err(ConversationError::OperationNotAllowed(
                "direct conversations have fixed membership".into(),
            ));
        }
        if actor != user_id && !self.can_manage_participants(actor, conversation_id)? {
            return Err(ConversationError::NotAuthorized(
                "owner or admin role required".into(),
            ));
        }
        if self.role_of(conversation_id, user_id)? == Some(ParticipantRole::Owner) {
            return Err(ConversationError::OperationNotAllowed(
                "transfer ownership before removing the owner".into(),
            ));
        }

        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversation_participants SET active = 0
             WHERE conversation_id = ?1 AND user_id = ?2 AND active = 1",
            params![conversation_id, user_id],
        )?;
        if changed == 0 {
            return Err(ConversationError::ParticipantNotFound(user_id.to_string()));
        }
        debug!(conversation_id, user_id, "participant deactivated");
        Ok(())
    }

    /// Tombstone the conversation: it disappears from listings and access
    /// checks immediately; the cleanup reconciler purges it after the
    /// retention window.
    pub fn soft_delete(&self, conversation_id: &str, actor: &str) -> Result<()> {
        self.authorize_delete(conversation_id, actor)?;
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET deleted_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )?;
        info!(conversation_id, actor, "conversation soft-deleted");
        Ok(())
    }

    /// Immediate cascade: purge messages, then participants, then the
    /// conversation row. The message purge runs first and aborts the whole
    /// operation on failure, so the relational side never outruns it.
    pub fn delete_cascade<F>(&self, conversation_id: &str, actor: &str, purge_messages: F) -> Result<()>
    where
        F: FnOnce(&str) -> std::result::Result<u64, String>,
    {
        self.authorize_delete(conversation_id, actor)?;

        let purged =
            purge_messages(conversation_id).map_err(ConversationError::PurgeFailed)?;

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let participants = tx.execute(
            "DELETE FROM conversation_participants WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;

        info!(
            conversation_id,
            actor,
            messages = purged,
            participants,
            "conversation deleted"
        );
        Ok(())
    }

    /// Active participant rows, senders included.
    pub fn active_participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
             WHERE conversation_id = ?1 AND active = 1
             ORDER BY joined_at"
        ))?;
        let rows = stmt.query_map(params![conversation_id], row_to_participant)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Ids of active participants, for receipt vectors and fanout.
    pub fn participant_ids(&self, conversation_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT user_id FROM conversation_participants
             WHERE conversation_id = ?1 AND active = 1",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn active_count(&self, conversation_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let count: u32 = db.query_row(
            "SELECT COUNT(*) FROM conversation_participants
             WHERE conversation_id = ?1 AND active = 1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record that the user has read up to now in this conversation.
    pub fn set_last_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversation_participants SET last_read_at = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id, now],
        )?;
        Ok(())
    }

    pub fn last_read_at(&self, conversation_id: &str, user_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT last_read_at FROM conversation_participants
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
            |row| row.get(0),
        ) {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConversationError::Database(e)),
        }
    }

    // --- reconciler support -------------------------------------------------

    /// Ids of all live conversations; the message store prunes anything
    /// referencing an id outside this set.
    pub fn live_ids(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id FROM conversations WHERE deleted_at IS NULL")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All tombstoned conversations.
    pub fn soft_deleted_ids(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id FROM conversations WHERE deleted_at IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Tombstones older than the cutoff (RFC3339), due for hard deletion.
    pub fn soft_deleted_before(&self, cutoff: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id FROM conversations
             WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Hard-delete the conversation and every participant row, active or
    /// not. Reconciler path, no authorization check.
    pub fn purge_rows(&self, conversation_id: &str) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM conversation_participants WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Test/seed helper mirror of `soft_delete` that backdates the
    /// tombstone; the reconciler's retention logic is exercised with it.
    pub fn soft_delete_at(&self, conversation_id: &str, deleted_at: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE conversations SET deleted_at = ?2 WHERE id = ?1",
            params![conversation_id, deleted_at],
        )?;
        Ok(())
    }

    // --- private helpers ----------------------------------------------------

    fn require_live(&self, conversation_id: &str) -> Result<Conversation> {
        match self.get(conversation_id)? {
            Some(c) if !c.is_deleted() => Ok(c),
            _ => Err(ConversationError::NotFound(conversation_id.to_string())),
        }
    }

    /// GROUP deletion requires the owner; DIRECT deletion any active
    /// participant.
    fn authorize_delete(&self, conversation_id: &str, actor: &str) -> Result<()> {
        let conversation = self.require_live(conversation_id)?;
        let allowed = match conversation.kind {
            ConversationKind::Group => self.is_owner(actor, conversation_id)?,
            ConversationKind::Direct => self.role_of(conversation_id, actor)?.is_some(),
        };
        if allowed {
            Ok(())
        } else {
            Err(ConversationError::NotAuthorized(
                "not permitted to delete this conversation".into(),
            ))
        }
    }

    fn participant_row(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants
                 WHERE conversation_id = ?1 AND user_id = ?2"
            ),
            params![conversation_id, user_id],
            row_to_participant,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConversationError::Database(e)),
        }
    }

    fn list_filtered(
        &self,
        user_id: &str,
        kind: Option<ConversationKind>,
    ) -> Result<Vec<Conversation>> {
        let db = self.db.lock().unwrap();
        let base = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.user_id = ?1 AND p.active = 1 AND c.deleted_at IS NULL"
        );
        let rows = match kind {
            Some(k) => {
                let mut stmt =
                    db.prepare(&format!("{base} AND c.kind = ?2 ORDER BY c.updated_at DESC"))?;
                let rows = stmt.query_map(params![user_id, k.to_string()], row_to_conversation)?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = db.prepare(&format!("{base} ORDER BY c.updated_at DESC"))?;
                let rows = stmt.query_map(params![user_id], row_to_conversation)?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }
}
