//! Error types for sessions and the coordination backend.

/// Error type for session and backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The backend could not be reached (connect failure, timeout, outage).
    #[error("coordination backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered with a protocol-level error.
    #[error("coordination backend rejected request ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    /// The backend has no record of the session (expired or destroyed).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session has no live lease to act with.
    #[error("session has no live lease")]
    SessionInvalid,

    /// The key is locked by a different session.
    #[error("lock on {key:?} is held by another session")]
    LockHeldByOther { key: String },

    /// Invalid construction parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::BackendRejected {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => Self::BackendRejected {
                status: 0,
                message: format!("malformed response: {}", e),
            },
            None => Self::BackendUnavailable(e.to_string()),
        }
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
