//! The message log: append and ordered fetch per conversation.
//!
//! This module is the single place where canonical message identifiers
//! and creation timestamps are assigned.  Callers hand in a draft; they
//! get back the committed record or an error, never a half-assigned one.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;

use parley_shared::{ConversationKey, Message, MessageDraft, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::UserRecord;

impl Database {
    /// Commit a message.
    ///
    /// Validates that the draft carries text or an image, assigns the
    /// canonical identifier and a creation timestamp, and persists the
    /// record.  The timestamp is forced past the conversation's previous
    /// commit when the wall clock has not advanced, so the log stays
    /// totally ordered even under rapid sends.
    pub fn append_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        draft: &MessageDraft,
    ) -> Result<Message> {
        draft.validate().map_err(|_| StoreError::EmptyBody)?;

        let key = ConversationKey::new(sender_id, receiver_id);

        let mut created_at = Utc::now();
        if let Some(last) = self.last_commit_time(&key)? {
            if created_at <= last {
                created_at = last + Duration::milliseconds(1);
            }
        }

        let message = Message {
            id: MessageId::new(),
            sender_id,
            receiver_id,
            text: draft.text.clone(),
            image: draft.image.clone(),
            created_at,
        };

        self.conn().execute(
            "INSERT INTO messages
                 (id, conversation_key, sender_id, receiver_id, body_text, body_image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id.to_string(),
                key.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.text,
                message.image,
                message.created_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(
            msg_id = %message.id,
            conversation = %key,
            "message committed"
        );

        Ok(message)
    }

    /// All messages for a conversation in ascending commit order.
    ///
    /// An unknown conversation key yields an empty vec -- a conversation
    /// with no history is a normal state, not an error.
    pub fn messages_for_conversation(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, body_text, body_image, created_at
             FROM messages
             WHERE conversation_key = ?1
             ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![key.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Users the given user has exchanged at least one message with,
    /// ordered by display name.  This backs the chats listing.
    pub fn chat_partners(&self, user_id: UserId) -> Result<Vec<UserRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT u.id, u.display_name, u.email, u.password_hash, u.avatar, u.created_at
             FROM users u
             WHERE u.id IN (
                 SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                 FROM messages
                 WHERE sender_id = ?1 OR receiver_id = ?1
             )
             ORDER BY u.display_name ASC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], crate::users::row_to_user)?;

        let mut partners = Vec::new();
        for row in rows {
            partners.push(row?);
        }
        Ok(partners)
    }

    /// Creation timestamp of the conversation's most recent commit.
    fn last_commit_time(&self, key: &ConversationKey) -> Result<Option<DateTime<Utc>>> {
        let result = self.conn().query_row(
            "SELECT created_at FROM messages
             WHERE conversation_key = ?1
             ORDER BY seq DESC
             LIMIT 1",
            params![key.to_string()],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(ts) => {
                let parsed = DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);
                Ok(Some(parsed))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let image: Option<String> = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id = MessageId::parse(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        text,
        image,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seed_users(db: &Database, count: usize) -> Vec<UserId> {
        (0..count)
            .map(|i| {
                let user = UserRecord {
                    id: UserId::new(),
                    display_name: format!("User {i}"),
                    email: format!("user{i}@example.com"),
                    password_hash: "$2b$12$fakefakefakefakefakefake".to_string(),
                    avatar: None,
                    created_at: Utc::now(),
                };
                db.create_user(&user).unwrap();
                user.id
            })
            .collect()
    }

    #[test]
    fn append_assigns_unique_canonical_ids() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        let mut seen = HashSet::new();
        for i in 0..20 {
            let msg = db
                .append_message(users[0], users[1], &MessageDraft::text(format!("m{i}")))
                .unwrap();
            assert!(seen.insert(msg.id), "duplicate canonical id");
        }
    }

    #[test]
    fn fetch_preserves_commit_order() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        let mut committed = Vec::new();
        for i in 0..10 {
            // Alternate direction; both land in the same conversation.
            let (from, to) = if i % 2 == 0 {
                (users[0], users[1])
            } else {
                (users[1], users[0])
            };
            committed.push(
                db.append_message(from, to, &MessageDraft::text(format!("m{i}")))
                    .unwrap(),
            );
        }

        let key = ConversationKey::new(users[0], users[1]);
        let fetched = db.messages_for_conversation(&key).unwrap();
        assert_eq!(fetched, committed);
    }

    #[test]
    fn timestamps_are_strictly_increasing_per_conversation() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        // Rapid commits land within the same clock tick; the store must
        // still hand out strictly increasing timestamps.
        let mut previous: Option<DateTime<Utc>> = None;
        for i in 0..50 {
            let msg = db
                .append_message(users[0], users[1], &MessageDraft::text(format!("m{i}")))
                .unwrap();
            if let Some(prev) = previous {
                assert!(msg.created_at > prev, "timestamp did not advance");
            }
            previous = Some(msg.created_at);
        }
    }

    #[test]
    fn empty_conversation_is_not_an_error() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        let key = ConversationKey::new(users[0], users[1]);
        assert_eq!(db.messages_for_conversation(&key).unwrap(), Vec::new());
    }

    #[test]
    fn empty_body_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        let err = db
            .append_message(users[0], users[1], &MessageDraft::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::EmptyBody));

        // Nothing was committed.
        let key = ConversationKey::new(users[0], users[1]);
        assert!(db.messages_for_conversation(&key).unwrap().is_empty());
    }

    #[test]
    fn conversations_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 3);

        db.append_message(users[0], users[1], &MessageDraft::text("to b"))
            .unwrap();
        db.append_message(users[0], users[2], &MessageDraft::text("to c"))
            .unwrap();

        let ab = db
            .messages_for_conversation(&ConversationKey::new(users[0], users[1]))
            .unwrap();
        let ac = db
            .messages_for_conversation(&ConversationKey::new(users[0], users[2]))
            .unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ac.len(), 1);
        assert_eq!(ab[0].text.as_deref(), Some("to b"));
        assert_eq!(ac[0].text.as_deref(), Some("to c"));
    }

    #[test]
    fn chat_partners_lists_distinct_correspondents() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 4);

        // users[0] talks to users[1] (both directions) and users[2];
        // users[3] never exchanges a message with users[0].
        db.append_message(users[0], users[1], &MessageDraft::text("hi"))
            .unwrap();
        db.append_message(users[1], users[0], &MessageDraft::text("hey"))
            .unwrap();
        db.append_message(users[2], users[0], &MessageDraft::text("yo"))
            .unwrap();

        let partners: HashSet<UserId> = db
            .chat_partners(users[0])
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(partners, HashSet::from([users[1], users[2]]));
    }

    #[test]
    fn image_only_message_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let users = seed_users(&db, 2);

        let draft = MessageDraft {
            text: None,
            image: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
        };
        let msg = db.append_message(users[0], users[1], &draft).unwrap();

        let key = ConversationKey::new(users[0], users[1]);
        let fetched = db.messages_for_conversation(&key).unwrap();
        assert_eq!(fetched, vec![msg]);
        assert!(fetched[0].text.is_none());
        assert_eq!(fetched[0].image, draft.image);
    }
}
