//! # parley-client
//!
//! Client library for the parley messaging server.
//!
//! Three layers, from pure to connected:
//! - [`sync`] -- the per-conversation cache: optimistic inserts,
//!   confirmation, rollback, and idempotent merging of pushed messages.
//!   Pure data, no IO, independently testable.
//! - [`api`] -- typed REST client for the server's HTTP surface.
//! - [`session`] -- the [`ChatSession`] service object tying the two
//!   together with a live push connection.  Created on login, destroyed
//!   on logout; nothing here is a process-wide singleton.

pub mod api;
pub mod session;
pub mod sync;

mod error;

pub use api::ApiClient;
pub use error::ClientError;
pub use session::{ChatSession, PushEvent, ViewDiff};
pub use sync::{ChatEntry, ConversationView, MergeOutcome};
