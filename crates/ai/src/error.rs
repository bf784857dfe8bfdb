use thiserror::Error;

/// Failure of a call to an external AI service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    /// The request itself is unusable (missing data, bad schema). Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced resource does not exist. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (DNS, refused, reset, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered, but the body was not what we asked for.
    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

impl AiError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, AiError::InvalidInput(_) | AiError::NotFound(_))
    }
}
