use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("vector encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MessageError>;
