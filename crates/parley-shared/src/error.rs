use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    /// A message draft carried neither text nor an image payload.
    #[error("Message must contain text or an image")]
    EmptyBody,

    /// Identifier parsing error.
    #[error("Invalid identifier: {0}")]
    InvalidId(#[from] uuid::Error),
}
