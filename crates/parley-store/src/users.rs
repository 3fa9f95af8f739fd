//! CRUD operations for [`UserRecord`] rows.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user.  Fails with [`StoreError::EmailTaken`] when the
    /// email is already registered.
    pub fn create_user(&self, user: &UserRecord) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (id, display_name, email, password_hash, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.display_name,
                user.email,
                user.password_hash,
                user.avatar,
                user.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::EmailTaken)
            }
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single user by identifier.
    pub fn get_user(&self, id: UserId) -> Result<UserRecord> {
        self.conn()
            .query_row(
                "SELECT id, display_name, email, password_hash, avatar, created_at
                 FROM users
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look up a user by email.  Returns `None` when no account exists,
    /// so the caller can collapse "no such user" and "wrong password"
    /// into one generic credential error.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let result = self.conn().query_row(
            "SELECT id, display_name, email, password_hash, avatar, created_at
             FROM users
             WHERE email = ?1",
            params![email],
            row_to_user,
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// List every addressable user except the caller, ordered by display
    /// name.  This backs the contacts listing.
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, display_name, email, password_hash, avatar, created_at
             FROM users
             WHERE id != ?1
             ORDER BY display_name ASC",
        )?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Update the mutable profile fields (display name and/or avatar).
    /// The identifier and email are immutable here.  Returns the fresh
    /// record.
    pub fn update_profile(
        &self,
        id: UserId,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<UserRecord> {
        if let Some(name) = display_name {
            self.conn().execute(
                "UPDATE users SET display_name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )?;
        }
        if let Some(avatar) = avatar {
            self.conn().execute(
                "UPDATE users SET avatar = ?1 WHERE id = ?2",
                params![avatar, id.to_string()],
            )?;
        }

        self.get_user(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`UserRecord`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let id_str: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let email: String = row.get(2)?;
    let password_hash: String = row.get(3)?;
    let avatar: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = UserId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(UserRecord {
        id,
        display_name,
        email,
        password_hash,
        avatar,
        created_at,
    })
}
