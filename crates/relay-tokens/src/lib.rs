//! Signed bearer tokens and the password-reset token lifecycle.
//!
//! Tokens are compact `header.claims.signature` strings signed with
//! HMAC-SHA-256; the secret lives only in this service, and rotating it
//! invalidates every outstanding token. Revocation goes through the
//! ephemeral blocklist keyed by `jti`; when that store is down, validation
//! fails open and a counter records the event.

mod error;
mod reset;
mod service;

pub use error::{Result, TokenError};
pub use reset::ResetTokens;
pub use service::{Claims, TokenService, TokenStatus};
