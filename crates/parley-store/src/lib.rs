//! # parley-store
//!
//! Durable persistence for parley: user accounts and per-conversation
//! message logs, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain
//! model.  The message helpers own the two guarantees the rest of the
//! system leans on: every canonical message identifier is assigned here
//! exactly once, and creation timestamps are monotonic per conversation.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::UserRecord;
