//! Persisted domain records.
//!
//! Committed messages are stored as the shared [`Message`] type directly;
//! only the user row needs a store-local shape, because it carries the
//! credential hash that must never leave this layer.
//!
//! [`Message`]: parley_shared::Message

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::{UserId, UserProfile};

/// A user row.  The primary key is the immutable [`UserId`]; display name
/// and avatar are the mutable profile fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub display_name: String,
    pub email: String,
    /// bcrypt hash of the password.  Stays inside the server process.
    pub password_hash: String,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// The public view of this user, without the credential hash.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            created_at: self.created_at,
        }
    }
}
