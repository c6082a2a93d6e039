/// Errors from durable backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored row failed its integrity check or is malformed.
    #[error("corrupt row {row}: {reason}")]
    Corrupt { row: String, reason: String },

    /// The backend refused the request (closed, read-only, injected fault).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
