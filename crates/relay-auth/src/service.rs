use std::sync::Arc;
use std::time::Duration;

use relay_core::config::ResetConfig;
use relay_ephemeral::{keys, EphemeralStore};
use relay_tokens::{ResetTokens, TokenService, TokenStatus};
use relay_users::{User, UserStore};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::email::EmailGateway;
use crate::error::{AuthError, Result};
use crate::password::{hash_password, verify_password};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

/// A logged-in principal: the user row plus their freshly minted token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

pub struct AuthService {
    users: Arc<UserStore>,
    tokens: Arc<TokenService>,
    reset_tokens: ResetTokens,
    ephemeral: Arc<dyn EphemeralStore>,
    email: Arc<dyn EmailGateway>,
    rate_window: Duration,
    rate_limit: u32,
    email_timeout: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<UserStore>,
        tokens: Arc<TokenService>,
        ephemeral: Arc<dyn EphemeralStore>,
        email: Arc<dyn EmailGateway>,
        reset: &ResetConfig,
        email_timeout: Duration,
    ) -> Self {
        Self {
            users,
            tokens,
            reset_tokens: ResetTokens::new(
                ephemeral.clone(),
                Duration::from_secs(reset.token_ttl_secs),
            ),
            ephemeral,
            email,
            rate_window: Duration::from_secs(reset.rate_window_secs),
            rate_limit: reset.rate_limit,
            email_timeout,
        }
    }

    pub fn register(&self, request: &RegisterRequest) -> Result<AuthSession> {
        let username = request.username.trim();
        if username.is_empty() {
            return Err(AuthError::Validation("username is required".into()));
        }
        if !request.email.contains('@') {
            return Err(AuthError::Validation("email address is invalid".into()));
        }
        validate_password(&request.password)?;

        let hash = hash_password(&request.password)?;
        let display_name = request
            .display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(username);
        let user = self
            .users
            .create(username, &request.email, &hash, display_name)?;
        self.users.set_online(&user.id, true)?;

        let token = self.tokens.mint(&user.id, &user.username);
        info!(user_id = %user.id, username, "user registered");
        Ok(AuthSession {
            user: User {
                online: true,
                ..user
            },
            token,
        })
    }

    pub fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let Some(user) = self.users.get_by_email(email)? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        self.users.set_online(&user.id, true)?;
        let token = self.tokens.mint(&user.id, &user.username);
        debug!(user_id = %user.id, "login");
        Ok(AuthSession {
            user: User {
                online: true,
                ..user
            },
            token,
        })
    }

    /// Revoke the presented token and mark the user offline. Invalid
    /// tokens still succeed from the caller's perspective.
    pub fn logout(&self, token: &str) {
        match self.tokens.parse(token) {
            Ok(claims) => {
                if let Err(e) = self.tokens.revoke(token) {
                    warn!(error = %e, "token revocation failed during logout");
                }
                if let Err(e) = self.users.set_online(&claims.uid, false) {
                    warn!(error = %e, "presence update failed during logout");
                }
            }
            Err(e) => debug!(error = %e, "logout with unparseable token, ignoring"),
        }
    }

    /// Full validation (signature, expiry, blocklist) and principal load.
    pub fn user_from_token(&self, token: &str) -> Result<User> {
        let claims = match self.tokens.validate(token) {
            TokenStatus::Active(claims) => claims,
            TokenStatus::Revoked => return Err(AuthError::TokenRevoked),
            TokenStatus::Expired | TokenStatus::Invalid => return Err(AuthError::InvalidToken),
        };
        self.users
            .get(&claims.uid)?
            .ok_or(AuthError::InvalidToken)
    }

    pub fn change_password(&self, user_id: &str, current: &str, new: &str) -> Result<()> {
        let user = self
            .users
            .get(user_id)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !verify_password(current, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if current == new {
            return Err(AuthError::Validation(
                "new password must differ from the current one".into(),
            ));
        }
        validate_password(new)?;

        self.users.set_password_hash(user_id, &hash_password(new)?)?;
        info!(user_id, "password changed");
        Ok(())
    }

    /// Stage one of the reset flow. Always succeeds as seen by the caller:
    /// rate-limited and unknown emails silently no-op, and a failing email
    /// provider changes nothing about the response.
    pub async fn request_password_reset(&self, email: &str) {
        let rate_key = keys::password_reset_rate(&email.to_lowercase());
        match self.ephemeral.count_in_window(&rate_key, self.rate_window) {
            Ok(count) if count > self.rate_limit as u64 => {
                warn!(email, count, "password reset rate limited");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "rate counter unavailable, continuing");
            }
        }

        let user = match self.users.get_by_email(email) {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!(email, "password reset for unknown email, ignoring");
                return;
            }
            Err(e) => {
                warn!(error = %e, "user lookup failed during password reset");
                return;
            }
        };

        let token = match self.reset_tokens.issue(&user.id) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "reset token issuance failed");
                return;
            }
        };

        let body = format!(
            "A password reset was requested for your account.\n\
             Reset token: {token}\n\
             The token expires in 30 minutes and can be used once."
        );
        let send = self.email.send(&user.email, "Password reset", &body);
        match tokio::time::timeout(self.email_timeout, send).await {
            Ok(Ok(())) => info!(user_id = %user.id, "password reset email sent"),
            Ok(Err(e)) => warn!(user_id = %user.id, error = %e, "password reset email failed"),
            Err(_) => warn!(user_id = %user.id, "password reset email timed out"),
        }
    }

    /// Stage two: consume the token and set the new password. The token is
    /// deleted before use, so a second redemption always fails.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let user_id = self
            .reset_tokens
            .redeem(token)?
            .ok_or(AuthError::InvalidResetToken)?;
        validate_password(new_password)?;

        self.users
            .set_password_hash(&user_id, &hash_password(new_password)?)?;
        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
