//! Shared error types.

use thiserror::Error;

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    /// No bearer token is cached locally yet. The session is still being
    /// established, so callers may retry shortly.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
    /// The server answered 2xx but with `success: false`.
    #[error("Request rejected by server: {0}")]
    Rejected(String),
}

impl ApiError {
    /// True when the failure means "not ready yet" rather than "broken".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ApiError::MissingCredentials(_))
    }
}
