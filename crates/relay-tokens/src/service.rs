use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use relay_core::config::TokenConfig;
use relay_ephemeral::{keys, EphemeralStore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, TokenError};

type HmacSha256 = Hmac<Sha256>;

/// Fixed JWS header for every token this service mints.
const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username of the principal.
    pub sub: String,
    /// Stable user id; the REST layer needs it on every request without a
    /// username lookup.
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Claim names the service owns; supplementary claims may not shadow them.
const RESERVED_CLAIMS: [&str; 7] = ["sub", "uid", "iss", "aud", "iat", "exp", "jti"];

/// Outcome of a full validation pass.
#[derive(Debug)]
pub enum TokenStatus {
    Active(Claims),
    Expired,
    Invalid,
    Revoked,
}

impl TokenStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TokenStatus::Active(_))
    }
}

pub struct TokenService {
    secret: Vec<u8>,
    ttl: Duration,
    issuer: String,
    audience: String,
    allow_legacy: bool,
    ephemeral: Arc<dyn EphemeralStore>,
    /// Times validation proceeded without a blocklist answer.
    blocklist_failures: AtomicU64,
}

impl TokenService {
    pub fn new(config: &TokenConfig, ephemeral: Arc<dyn EphemeralStore>) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            ttl: Duration::from_secs(config.ttl_secs),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            allow_legacy: config.allow_legacy,
            ephemeral,
            blocklist_failures: AtomicU64::new(0),
        }
    }

    /// Mint a token for `user_id`/`username` with the configured lifetime.
    pub fn mint(&self, user_id: &str, username: &str) -> String {
        self.mint_with_claims(user_id, username, serde_json::Map::new())
    }

    /// Mint with caller-supplied supplementary claims. Reserved claim
    /// names are stripped from `extra`, so callers cannot forge `exp` or
    /// `jti`.
    pub fn mint_with_claims(
        &self,
        user_id: &str,
        username: &str,
        mut extra: serde_json::Map<String, serde_json::Value>,
    ) -> String {
        for name in RESERVED_CLAIMS {
            extra.remove(name);
        }
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            uid: user_id.to_string(),
            iss: Some(self.issuer.clone()),
            aud: Some(self.audience.clone()),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            jti: Uuid::new_v4().simple().to_string(),
            extra,
        };
        self.encode(&claims)
    }

    /// Verify the signature and structure; no expiry or blocklist checks.
    pub fn parse(&self, token: &str) -> Result<Claims> {
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
            _ => return Err(TokenError::Malformed("expected three segments".into())),
        };

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| TokenError::Malformed(format!("signature encoding: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| TokenError::Malformed("invalid key length".into()))?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| TokenError::SignatureMismatch)?;

        let claims_json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| TokenError::Malformed(format!("payload encoding: {e}")))?;
        serde_json::from_slice(&claims_json)
            .map_err(|e| TokenError::Malformed(format!("claims: {e}")))
    }

    /// Full validation: signature, expiry, issuer/audience, blocklist.
    ///
    /// When the ephemeral store cannot answer, the token is accepted anyway:
    /// availability wins over revocation recency. The event is counted and
    /// logged so operators can see how long they ran blind.
    pub fn validate(&self, token: &str) -> TokenStatus {
        let claims = match self.parse(token) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "token rejected during parse");
                return TokenStatus::Invalid;
            }
        };

        if claims.exp <= Utc::now().timestamp() {
            return TokenStatus::Expired;
        }

        match (&claims.iss, &claims.aud) {
            (Some(iss), Some(aud)) => {
                if iss != &self.issuer || aud != &self.audience {
                    return TokenStatus::Invalid;
                }
            }
            _ if self.allow_legacy => {
                warn!(jti = %claims.jti, "accepting legacy token without issuer/audience");
            }
            _ => return TokenStatus::Invalid,
        }

        match self.ephemeral.get(&keys::token_blocklist(&claims.jti)) {
            Ok(Some(_)) => TokenStatus::Revoked,
            Ok(None) => TokenStatus::Active(claims),
            Err(e) => {
                self.blocklist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "blocklist unreachable, failing open");
                TokenStatus::Active(claims)
            }
        }
    }

    /// The token's unique identifier (`jti`), after signature verification.
    pub fn extract_id(&self, token: &str) -> Result<String> {
        Ok(self.parse(token)?.jti)
    }

    /// Place the token's jti on the blocklist for its remaining lifetime.
    /// Already-expired tokens are not stored; their natural expiry is the
    /// revocation.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let claims = self.parse(token)?;
        let remaining = claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            return Ok(());
        }
        self.ephemeral.set(
            &keys::token_blocklist(&claims.jti),
            "revoked",
            Some(Duration::from_secs(remaining as u64)),
        )?;
        debug!(jti = %claims.jti, remaining_secs = remaining, "token revoked");
        Ok(())
    }

    /// How often validation proceeded without a blocklist answer.
    pub fn blocklist_failure_count(&self) -> u64 {
        self.blocklist_failures.load(Ordering::Relaxed)
    }

    fn encode(&self, claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(claims).expect("claims serialization is infallible"),
        );
        let signing_input = format!("{header}.{payload}");

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{signing_input}.{signature}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_ephemeral::{EphemeralError, MemoryEphemeral};

    fn config() -> TokenConfig {
        TokenConfig {
            secret: "test-secret".to_string(),
            ttl_secs: 3600,
            issuer: "relay".to_string(),
            audience: "relay-clients".to_string(),
            allow_legacy: false,
        }
    }

    fn service() -> TokenService {
        TokenService::new(&config(), Arc::new(MemoryEphemeral::new()))
    }

    #[test]
    fn mint_parse_round_trip() {
        let svc = service();
        let token = svc.mint("u-1", "alice");
        let claims = svc.parse(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.uid, "u-1");
        assert_eq!(claims.iss.as_deref(), Some("relay"));
        assert!(claims.exp > claims.iat);
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn minted_token_validates_active() {
        let svc = service();
        let token = svc.mint("u-1", "alice");
        assert!(svc.validate(&token).is_active());
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let svc = service();
        let token = svc.mint("u-1", "alice");
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(r#"{"sub":"mallory","uid":"u-9","iat":0,"exp":99999999999,"jti":"x"}"#);
        parts[1] = &forged;
        let tampered = parts.join(".");
        assert!(matches!(svc.validate(&tampered), TokenStatus::Invalid));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let svc = service();
        let mut other_cfg = config();
        other_cfg.secret = "different".to_string();
        let other = TokenService::new(&other_cfg, Arc::new(MemoryEphemeral::new()));
        let token = other.mint("u-1", "alice");
        assert!(matches!(svc.validate(&token), TokenStatus::Invalid));
    }

    #[test]
    fn expired_token_reports_expired() {
        let mut cfg = config();
        cfg.ttl_secs = 0;
        let svc = TokenService::new(&cfg, Arc::new(MemoryEphemeral::new()));
        let token = svc.mint("u-1", "alice");
        assert!(matches!(svc.validate(&token), TokenStatus::Expired));
    }

    #[test]
    fn issuer_mismatch_is_invalid() {
        let store = Arc::new(MemoryEphemeral::new());
        let mut foreign_cfg = config();
        foreign_cfg.issuer = "someone-else".to_string();
        let foreign = TokenService::new(&foreign_cfg, store.clone());
        let svc = TokenService::new(&config(), store);
        let token = foreign.mint("u-1", "alice");
        assert!(matches!(svc.validate(&token), TokenStatus::Invalid));
    }

    #[test]
    fn revoked_token_reports_revoked() {
        let svc = service();
        let token = svc.mint("u-1", "alice");
        svc.revoke(&token).unwrap();
        assert!(matches!(svc.validate(&token), TokenStatus::Revoked));
    }

    #[test]
    fn revoking_expired_token_stores_nothing() {
        let store = Arc::new(MemoryEphemeral::new());
        let mut cfg = config();
        cfg.ttl_secs = 0;
        let svc = TokenService::new(&cfg, store.clone());
        let token = svc.mint("u-1", "alice");
        svc.revoke(&token).unwrap();
        let jti = svc.parse(&token).unwrap().jti;
        assert_eq!(store.get(&keys::token_blocklist(&jti)).unwrap(), None);
    }

    /// Store that refuses every operation, standing in for an unreachable
    /// backend.
    struct DownStore;

    impl EphemeralStore for DownStore {
        fn set(&self, _: &str, _: &str, _: Option<Duration>) -> relay_ephemeral::Result<()> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn get(&self, _: &str) -> relay_ephemeral::Result<Option<String>> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn delete(&self, _: &str) -> relay_ephemeral::Result<()> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn take(&self, _: &str) -> relay_ephemeral::Result<Option<String>> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn set_add(&self, _: &str, _: &str) -> relay_ephemeral::Result<()> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn set_remove(&self, _: &str, _: &str) -> relay_ephemeral::Result<()> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn set_members(&self, _: &str) -> relay_ephemeral::Result<Vec<String>> {
            Err(EphemeralError::Unavailable("down".into()))
        }
        fn count_in_window(&self, _: &str, _: Duration) -> relay_ephemeral::Result<u64> {
            Err(EphemeralError::Unavailable("down".into()))
        }
    }

    #[test]
    fn blocklist_outage_fails_open_and_counts() {
        let svc = TokenService::new(&config(), Arc::new(DownStore));
        let token = svc.mint("u-1", "alice");
        assert!(svc.validate(&token).is_active());
        assert_eq!(svc.blocklist_failure_count(), 1);
    }

    #[test]
    fn legacy_token_needs_the_switch() {
        let store = Arc::new(MemoryEphemeral::new());
        let strict = TokenService::new(&config(), store.clone());
        let mut legacy_cfg = config();
        legacy_cfg.allow_legacy = true;
        let lenient = TokenService::new(&legacy_cfg, store);

        // forge a signed token without iss/aud by encoding claims directly
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "alice".into(),
            uid: "u-1".into(),
            iss: None,
            aud: None,
            iat: now,
            exp: now + 3600,
            jti: "legacy-1".into(),
            extra: serde_json::Map::new(),
        };
        let token = strict.encode(&claims);

        assert!(matches!(strict.validate(&token), TokenStatus::Invalid));
        assert!(lenient.validate(&token).is_active());
    }
}
