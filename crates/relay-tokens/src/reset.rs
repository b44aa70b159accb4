use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use relay_ephemeral::{keys, EphemeralStore};
use tracing::debug;

use crate::error::Result;

/// 32 random bytes → 43 URL-safe characters, comfortably past the 128-bit
/// entropy floor for an unguessable token.
const RESET_TOKEN_BYTES: usize = 32;

/// Single-use password-reset tokens.
///
/// Single use is structural: redemption is an atomic take on the ephemeral
/// store, so the second redeemer of the same token always sees a miss.
pub struct ResetTokens {
    ephemeral: Arc<dyn EphemeralStore>,
    ttl: Duration,
}

impl ResetTokens {
    pub fn new(ephemeral: Arc<dyn EphemeralStore>, ttl: Duration) -> Self {
        Self { ephemeral, ttl }
    }

    /// Issue a fresh token bound to `user_id`.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.ephemeral
            .set(&keys::password_reset(&token), user_id, Some(self.ttl))?;
        debug!(user_id, ttl_secs = self.ttl.as_secs(), "reset token issued");
        Ok(token)
    }

    /// Consume a token, returning the bound user id. A miss means the
    /// token never existed, expired, or was already used; callers cannot
    /// tell which.
    pub fn redeem(&self, token: &str) -> Result<Option<String>> {
        Ok(self.ephemeral.take(&keys::password_reset(token))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ephemeral::MemoryEphemeral;

    fn tokens() -> ResetTokens {
        ResetTokens::new(
            Arc::new(MemoryEphemeral::new()),
            Duration::from_secs(30 * 60),
        )
    }

    #[test]
    fn issue_then_redeem_once() {
        let reset = tokens();
        let token = reset.issue("u-7").unwrap();
        assert_eq!(reset.redeem(&token).unwrap().as_deref(), Some("u-7"));
        assert_eq!(reset.redeem(&token).unwrap(), None);
    }

    #[test]
    fn tokens_are_url_safe_and_long() {
        let reset = tokens();
        let token = reset.issue("u-7").unwrap();
        assert!(token.len() >= 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn unknown_token_misses() {
        let reset = tokens();
        assert_eq!(reset.redeem("never-issued").unwrap(), None);
    }

    #[test]
    fn expired_token_misses() {
        let reset = ResetTokens::new(Arc::new(MemoryEphemeral::new()), Duration::ZERO);
        let token = reset.issue("u-7").unwrap();
        assert_eq!(reset.redeem(&token).unwrap(), None);
    }
}
