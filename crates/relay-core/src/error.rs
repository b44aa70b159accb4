use thiserror::Error;

/// Cross-subsystem error taxonomy. Subsystem crates keep their own error
/// enums and convert into this at the request boundary, where it is mapped
/// to a status code and a safe client-facing message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not permitted: {0}")]
    Authorization(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Never surfaced on the password-reset path; that API answers
    /// success regardless.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Pipeline overloaded")]
    Overloaded,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short error code string sent to clients in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AuthenticationFailed(_) => "AUTH_FAILED",
            CoreError::Authorization(_) => "FORBIDDEN",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::RateLimited(_) => "RATE_LIMITED",
            CoreError::Transient(_) => "TRANSIENT",
            CoreError::Overloaded => "OVERLOADED",
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::Overloaded)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
