use thiserror::Error;

/// User-layer errors. Kept separate from the core taxonomy so the gateway
/// can map them to response codes without coupling layers.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, UserError>;
