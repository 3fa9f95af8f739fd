use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level HTTP failure (connection refused, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with an error status.
    #[error("Server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    /// Push-channel failure.
    #[error("Push channel error: {0}")]
    Push(String),

    /// A frame or body did not decode.
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// Operation requires an active conversation view.
    #[error("No active conversation")]
    NoConversation,
}

impl ClientError {
    /// Whether this is a server-side rejection (as opposed to a
    /// transport or decode failure).
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
