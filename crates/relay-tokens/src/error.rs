use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("ephemeral store error: {0}")]
    Store(#[from] relay_ephemeral::EphemeralError),
}

pub type Result<T> = std::result::Result<T, TokenError>;
