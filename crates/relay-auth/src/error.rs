use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// One message for both bad email and bad password.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token revoked")]
    TokenRevoked,

    #[error("invalid or already used reset token")]
    InvalidResetToken,

    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("user store error: {0}")]
    Users(relay_users::UserError),

    #[error("token error: {0}")]
    Tokens(#[from] relay_tokens::TokenError),

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

impl From<relay_users::UserError> for AuthError {
    fn from(e: relay_users::UserError) -> Self {
        match e {
            relay_users::UserError::UsernameTaken => AuthError::UsernameTaken,
            relay_users::UserError::EmailTaken => AuthError::EmailTaken,
            other => AuthError::Users(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
