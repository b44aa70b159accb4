use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::debug;
use uuid::Uuid;

use crate::db::{row_to_user, USER_COLUMNS};
use crate::error::{Result, UserError};
use crate::types::User;

/// Thread-safe store for the users table.
///
/// Wraps a single SQLite connection in a `Mutex`; queries are short and
/// index-backed, so a connection pool is not worth its weight here.
pub struct UserStore {
    db: Mutex<Connection>,
}

impl UserStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Insert a new user. The id is generated here so the caller
    /// immediately has the canonical id without a follow-up query.
    pub fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        display_name: &str,
    ) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        let user = User {
            id: Uuid::now_v7().to_string(),
            username: username.to_string(),
            email: email.to_lowercase(),
            password_hash: password_hash.to_string(),
            display_name: display_name.to_string(),
            avatar_url: None,
            online: false,
            last_seen_at: now.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO users
             (id, username, email, password_hash, display_name, avatar_url,
              online, last_seen_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.display_name,
                user.avatar_url,
                user.online as i32,
                user.last_seen_at,
                user.created_at,
                user.updated_at,
            ],
        )
        .map_err(map_unique_violation)?;

        debug!(user_id = %user.id, username, "user created");
        Ok(user)
    }

    /// Load a user by primary key. Returns None instead of an error when
    /// absent so callers decide whether missing is exceptional.
    pub fn get(&self, user_id: &str) -> Result<Option<User>> {
        self.query_one("id = ?1", user_id)
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.query_one("username = ?1", username)
    }

    /// Email lookup is case-insensitive by normalizing the probe the same
    /// way writes are normalized.
    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.query_one("email = ?1", &email.to_lowercase())
    }

    /// Substring search over username and display name for the
    /// conversation-creation picker.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<User>> {
        let pattern = format!("%{}%", query);
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username LIKE ?1 OR display_name LIKE ?1
             ORDER BY username
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], row_to_user)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// True for every id in `ids` that exists. Used to validate group
    /// membership lists before the participant insert.
    pub fn all_exist(&self, ids: &[String]) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT 1 FROM users WHERE id = ?1")?;
        for id in ids {
            if !stmt.exists(params![id])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Flip the online flag; also bumps last_seen_at when going online.
    pub fn set_online(&self, user_id: &str, online: bool) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE users SET online = ?2, last_seen_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![user_id, online as i32, now],
        )?;
        if changed == 0 {
            return Err(UserError::NotFound(user_id.to_string()));
        }
        Ok(())
    }

    pub fn touch_last_seen(&self, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
            params![user_id, now],
        )?;
        Ok(())
    }

    /// Apply only the fields present in the request.
    pub fn update_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User> {
        let now = Utc::now().to_rfc3339();
        {
            let db = self.db.lock().unwrap();
            if let Some(name) = display_name {
                db.execute(
                    "UPDATE users SET display_name = ?2, updated_at = ?3 WHERE id = ?1",
                    params![user_id, name, now],
                )?;
            }
            if let Some(url) = avatar_url {
                db.execute(
                    "UPDATE users SET avatar_url = ?2, updated_at = ?3 WHERE id = ?1",
                    params![user_id, url, now],
                )?;
            }
        }
        self.get(user_id)?
            .ok_or_else(|| UserError::NotFound(user_id.to_string()))
    }

    pub fn set_password_hash(&self, user_id: &str, hash: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, hash, now],
        )?;
        if changed == 0 {
            return Err(UserError::NotFound(user_id.to_string()));
        }
        Ok(())
    }

    fn query_one(&self, predicate: &str, value: &str) -> Result<Option<User>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}"))?;
        match stmt.query_row(params![value], row_to_user) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(UserError::Database(e)),
        }
    }
}

/// Translate the UNIQUE constraint failure into the field-specific error
/// the registration flow reports.
fn map_unique_violation(e: rusqlite::Error) -> UserError {
    if let rusqlite::Error::SqliteFailure(code, Some(msg)) = &e {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("users.username") {
                return UserError::UsernameTaken;
            }
            if msg.contains("users.email") {
                return UserError::EmailTaken;
            }
        }
    }
    UserError::Database(e)
}
