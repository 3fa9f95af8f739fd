//! Push-channel wire protocol.
//!
//! Frames are JSON text so that browser clients can consume them without a
//! binary codec.  The server is the only sender; clients never write
//! application frames on the push channel.

use serde::{Deserialize, Serialize};

use crate::types::{Message, UserId};

/// Server-to-client events emitted over a live push connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The full list of currently online users.  Broadcast to every live
    /// connection whenever the presence registry changes.
    #[serde(rename_all = "camelCase")]
    OnlineUsers { user_ids: Vec<UserId> },

    /// One freshly committed message, relayed to the receiver's live
    /// connections.
    NewMessage { message: Message },
}

impl ServerEvent {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON text frame.
    pub fn from_json(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageDraft, MessageId};
    use chrono::Utc;

    #[test]
    fn server_event_roundtrip() {
        let draft = MessageDraft::text("hello");
        let event = ServerEvent::NewMessage {
            message: Message {
                id: MessageId::new(),
                sender_id: UserId::new(),
                receiver_id: UserId::new(),
                text: draft.text,
                image: draft.image,
                created_at: Utc::now(),
            },
        };

        let frame = event.to_json().unwrap();
        let restored = ServerEvent::from_json(&frame).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn frames_are_type_tagged() {
        let event = ServerEvent::OnlineUsers {
            user_ids: vec![UserId::new()],
        };
        let frame = event.to_json().unwrap();
        assert!(frame.contains(r#""type":"online_users""#));
        assert!(frame.contains(r#""userIds""#));
    }
}
