//! Error taxonomy for the session core.
//!
//! Not-found and configuration variants map to client-facing responses at the
//! API layer; room-server and persistence variants are logged there and
//! surfaced generically.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Room-server credentials are absent. Raised at construction time, never
    /// per request.
    #[error("room server credentials are not configured")]
    Configuration,

    #[error("agent '{0}' not found")]
    AgentNotFound(Uuid),

    #[error("session '{0}' not found")]
    SessionNotFound(Uuid),

    /// Network failure or non-success response from the room server's control
    /// API. No internal retry; the operation fails as a whole.
    #[error("room server request failed: {0}")]
    RoomServer(String),

    #[error("persistence operation failed: {0}")]
    Persistence(String),

    #[error("access token signing failed: {0}")]
    TokenSigning(String),
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::RoomServer(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for CoreError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        CoreError::TokenSigning(err.to_string())
    }
}
