//! Message relay: push a freshly committed message to the receiver's
//! live connections.
//!
//! The relay is fire-and-forget against the push layer.  It never
//! retries and never queues; durability comes from the message store
//! having committed the record before the relay is attempted.  A
//! receiver with no live connections is a successful no-op -- the
//! message is picked up by their next fetch.

use std::sync::Arc;

use tracing::debug;

use parley_shared::{Message, ServerEvent};

use crate::presence::PresenceRegistry;

pub struct MessageRelay {
    presence: Arc<PresenceRegistry>,
}

impl MessageRelay {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Emit `message` to each of the receiver's live connections.
    ///
    /// Returns the number of connections the frame was handed to.  A
    /// connection that disconnected between lookup and emit shows up as a
    /// closed channel; the frame is dropped and the receiver recovers the
    /// message on its next fetch.
    pub fn relay(&self, message: &Message) -> usize {
        let sinks = self.presence.connections_of(message.receiver_id);
        if sinks.is_empty() {
            debug!(
                msg_id = %message.id,
                receiver = %message.receiver_id,
                "receiver offline, store-only delivery"
            );
            return 0;
        }

        let mut delivered = 0;
        for sink in sinks {
            let event = ServerEvent::NewMessage {
                message: message.clone(),
            };
            if sink.send(event).is_ok() {
                delivered += 1;
            } else {
                debug!(
                    msg_id = %message.id,
                    receiver = %message.receiver_id,
                    "connection closed between lookup and emit, frame dropped"
                );
            }
        }

        debug!(
            msg_id = %message.id,
            receiver = %message.receiver_id,
            delivered,
            "message relayed"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::sync::mpsc;

    use parley_shared::{ConnectionId, MessageDraft, MessageId, UserId};

    fn test_message(sender: UserId, receiver: UserId) -> Message {
        let draft = MessageDraft::text("hi");
        Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            text: draft.text,
            image: draft.image,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn relays_to_every_receiver_connection() {
        let presence = Arc::new(PresenceRegistry::new());
        let relay = MessageRelay::new(presence.clone());
        let sender = UserId::new();
        let receiver = UserId::new();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        presence.register(receiver, ConnectionId::new(), tx_a);
        presence.register(receiver, ConnectionId::new(), tx_b);

        let message = test_message(sender, receiver);
        assert_eq!(relay.relay(&message), 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let pushed = loop {
                match rx.try_recv().expect("frame expected") {
                    ServerEvent::NewMessage { message } => break message,
                    ServerEvent::OnlineUsers { .. } => continue,
                }
            };
            assert_eq!(pushed, message);
        }
    }

    #[test]
    fn offline_receiver_is_a_successful_noop() {
        let presence = Arc::new(PresenceRegistry::new());
        let relay = MessageRelay::new(presence);

        let message = test_message(UserId::new(), UserId::new());
        assert_eq!(relay.relay(&message), 0);
    }

    #[test]
    fn sender_connections_are_not_pushed_to() {
        let presence = Arc::new(PresenceRegistry::new());
        let relay = MessageRelay::new(presence.clone());
        let sender = UserId::new();
        let receiver = UserId::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.register(sender, ConnectionId::new(), tx);

        let message = test_message(sender, receiver);
        assert_eq!(relay.relay(&message), 0);

        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, ServerEvent::OnlineUsers { .. }));
        }
    }

    #[test]
    fn offline_receiver_recovers_message_on_next_fetch() {
        use parley_shared::ConversationKey;
        use parley_store::{Database, UserRecord};

        let db = Database::open_in_memory().unwrap();
        let sender = UserRecord {
            id: UserId::new(),
            display_name: "A".into(),
            email: "a@example.com".into(),
            password_hash: "$2b$12$fakefakefakefakefakefake".into(),
            avatar: None,
            created_at: Utc::now(),
        };
        let receiver = UserRecord {
            id: UserId::new(),
            display_name: "B".into(),
            email: "b@example.com".into(),
            password_hash: "$2b$12$fakefakefakefakefakefake".into(),
            avatar: None,
            created_at: Utc::now(),
        };
        db.create_user(&sender).unwrap();
        db.create_user(&receiver).unwrap();

        let presence = Arc::new(PresenceRegistry::new());
        let relay = MessageRelay::new(presence.clone());

        // B is disconnected: the commit succeeds, the relay is a no-op,
        // and the presence registry excludes B.
        let message = db
            .append_message(sender.id, receiver.id, &MessageDraft::text("hi"))
            .unwrap();
        assert_eq!(relay.relay(&message), 0);
        assert!(!presence.list_online().contains(&receiver.id));

        // When B later fetches, the message is present.
        let key = ConversationKey::new(sender.id, receiver.id);
        assert_eq!(db.messages_for_conversation(&key).unwrap(), vec![message]);
    }

    #[test]
    fn closed_connection_is_dropped_silently() {
        let presence = Arc::new(PresenceRegistry::new());
        let relay = MessageRelay::new(presence.clone());
        let receiver = UserId::new();

        let (tx, rx) = mpsc::unbounded_channel();
        presence.register(receiver, ConnectionId::new(), tx);
        drop(rx);

        // The connection is gone but still registered; the emit must not
        // panic or error, only skip.
        let message = test_message(UserId::new(), receiver);
        assert_eq!(relay.relay(&message), 0);
    }
}
