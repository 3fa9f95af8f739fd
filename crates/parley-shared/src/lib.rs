//! # parley-shared
//!
//! Domain types shared between the parley server and client: identifier
//! newtypes, the canonical message record, and the push-channel wire
//! protocol.
//!
//! Everything here is plain data.  IO, persistence, and delivery live in
//! the `parley-store`, `parley-server`, and `parley-client` crates.

pub mod protocol;
pub mod types;

mod error;

pub use error::SharedError;
pub use protocol::ServerEvent;
pub use types::*;
