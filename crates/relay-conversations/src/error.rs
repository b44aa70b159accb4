use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found: {0}")]
    NotFound(String),

    #[error("participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("participant cap exceeded: {active} active, cap {cap}")]
    CapacityExceeded { active: u32, cap: u32 },

    #[error("invalid input: {0}")]
    Validation(String),

    /// The message purge preceding a cascade delete failed; the relational
    /// rows were left untouched so the conversation stays recoverable.
    #[error("message purge failed: {0}")]
    PurgeFailed(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("user store error: {0}")]
    Users(#[from] relay_users::UserError),
}

pub type Result<T> = std::result::Result<T, ConversationError>;
