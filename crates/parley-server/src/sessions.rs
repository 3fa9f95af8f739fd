//! In-memory session credentials.
//!
//! A session is an opaque random token bound to one user.  Tokens are
//! issued at signup/login, resolved on every authenticated request and at
//! push-connection time, and revoked at logout.  They live only in the
//! serving process; restarting the server logs everyone out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;

use parley_shared::UserId;

#[derive(Debug, Clone)]
struct Session {
    user_id: UserId,
    issued_at: Instant,
}

/// Token -> user binding with a fixed time-to-live.
pub struct SessionStore {
    inner: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh token for the user.
    pub fn issue(&self, user_id: UserId) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let mut sessions = self.inner.lock().expect("session store lock poisoned");
        sessions.insert(
            token.clone(),
            Session {
                user_id,
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// Resolve a token to its user, if it exists and has not expired.
    pub fn resolve(&self, token: &str) -> Option<UserId> {
        let sessions = self.inner.lock().expect("session store lock poisoned");
        let session = sessions.get(token)?;
        if session.issued_at.elapsed() >= self.ttl {
            return None;
        }
        Some(session.user_id)
    }

    /// Revoke a token.  Returns `true` if it existed.
    pub fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.inner.lock().expect("session store lock poisoned");
        sessions.remove(token).is_some()
    }

    /// Drop expired sessions.  Called periodically from a background task.
    pub fn purge_expired(&self) {
        let mut sessions = self.inner.lock().expect("session store lock poisoned");
        sessions.retain(|_, session| session.issued_at.elapsed() < self.ttl);
    }
}
