//! Presence registry: who is online, and over which connections.
//!
//! Process-wide in-memory state, scoped to the lifetime of the serving
//! process.  One mutex guards the whole user -> connections map so that
//! concurrent register/unregister calls (two devices connecting at once,
//! a disconnect racing a connect) never lose an update.
//!
//! Every change to the map broadcasts the full online-user list to every
//! live connection, so every client's presence view stays consistent.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use parley_shared::{ConnectionId, ServerEvent, UserId};

/// Sender half of a connection's push channel.  Unbounded so that emits
/// never block while the registry lock is held.
pub type PushSender = mpsc::UnboundedSender<ServerEvent>;

/// Tracks all live push connections, grouped by user.
///
/// An entry for a user exists if and only if it has at least one live
/// connection.
pub struct PresenceRegistry {
    inner: Mutex<HashMap<UserId, HashMap<ConnectionId, PushSender>>>,
}

impl PresenceRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record a newly bound connection for a user.
    ///
    /// Idempotent: re-registering a known connection replaces its sender
    /// and does not broadcast.  Any actual change broadcasts the updated
    /// online list to all connections.
    pub fn register(&self, user_id: UserId, connection_id: ConnectionId, sender: PushSender) {
        let broadcast = {
            let mut users = self.inner.lock().expect("presence lock poisoned");
            let connections = users.entry(user_id).or_default();
            let newly_added = connections.insert(connection_id, sender).is_none();

            debug!(
                user = %user_id,
                connection = %connection_id,
                connections = connections.len(),
                "connection registered"
            );

            newly_added.then(|| Self::snapshot(&users))
        };

        if let Some((online, sinks)) = broadcast {
            Self::broadcast_online(online, sinks);
        }
    }

    /// Remove a connection from whichever user's set contains it.
    ///
    /// When the user's set becomes empty the user transitions to offline.
    /// Safe to call on an unknown connection (no-op, no broadcast).
    pub fn unregister(&self, connection_id: ConnectionId) {
        let broadcast = {
            let mut users = self.inner.lock().expect("presence lock poisoned");

            let owner = users
                .iter()
                .find(|(_, connections)| connections.contains_key(&connection_id))
                .map(|(user_id, _)| *user_id);

            let Some(user_id) = owner else {
                return;
            };
            let Some(connections) = users.get_mut(&user_id) else {
                return;
            };
            connections.remove(&connection_id);
            let went_offline = connections.is_empty();
            if went_offline {
                users.remove(&user_id);
            }

            debug!(
                user = %user_id,
                connection = %connection_id,
                went_offline,
                "connection unregistered"
            );

            Some(Self::snapshot(&users))
        };

        if let Some((online, sinks)) = broadcast {
            Self::broadcast_online(online, sinks);
        }
    }

    /// Users with at least one live connection.
    pub fn list_online(&self) -> Vec<UserId> {
        let users = self.inner.lock().expect("presence lock poisoned");
        users.keys().copied().collect()
    }

    /// Push senders for every live connection of the given user.  Empty
    /// when the user is offline.
    pub fn connections_of(&self, user_id: UserId) -> Vec<PushSender> {
        let users = self.inner.lock().expect("presence lock poisoned");
        users
            .get(&user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live connections across all users.
    pub fn connection_count(&self) -> usize {
        let users = self.inner.lock().expect("presence lock poisoned");
        users.values().map(|connections| connections.len()).sum()
    }

    /// Online list plus every live sender, captured under the lock so the
    /// emitted list matches the state that produced it.
    fn snapshot(
        users: &HashMap<UserId, HashMap<ConnectionId, PushSender>>,
    ) -> (Vec<UserId>, Vec<PushSender>) {
        let online: Vec<UserId> = users.keys().copied().collect();
        let sinks: Vec<PushSender> = users
            .values()
            .flat_map(|connections| connections.values().cloned())
            .collect();
        (online, sinks)
    }

    /// Emit the online list to every captured sender.  Runs after the
    /// lock is released; a closed channel means that connection is
    /// already tearing down, so the frame is silently dropped.
    fn broadcast_online(online: Vec<UserId>, sinks: Vec<PushSender>) {
        for sink in sinks {
            let _ = sink.send(ServerEvent::OnlineUsers {
                user_ids: online.clone(),
            });
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
