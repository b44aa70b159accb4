use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024; // 64 KB hard cap per frame
/// Session binding lifetime in the ephemeral store.
pub const SESSION_BINDING_TTL_SECS: u64 = 24 * 60 * 60;
/// Presence key lifetime while a connection is active; refreshed on traffic.
pub const PRESENCE_TTL_SECS: u64 = 5 * 60;
/// Grace period during which a user still shows offline after disconnect.
pub const OFFLINE_GRACE_SECS: u64 = 60;

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub reset: ResetConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// HMAC-SHA-256 signing secret. Rotating it invalidates every
    /// outstanding token.
    #[serde(default = "default_token_secret")]
    pub secret: String,
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Migration switch: accept tokens that lack issuer/audience claims.
    /// Every acceptance is logged as a warning.
    #[serde(default)]
    pub allow_legacy: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: default_token_secret(),
            ttl_secs: default_token_ttl(),
            issuer: default_issuer(),
            audience: default_audience(),
            allow_legacy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Relational store: users, conversations, participants.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Document store: the append-only messages collection.
    #[serde(default = "default_messages_path")]
    pub messages_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            messages_path: default_messages_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Connections missing heartbeats for this long are closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long shutdown waits for the worker to drain the queue.
    #[serde(default = "default_drain_secs")]
    pub drain_deadline_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            drain_deadline_secs: default_drain_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Soft-deleted conversations older than this are hard-deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetConfig {
    #[serde(default = "default_reset_ttl")]
    pub token_ttl_secs: u64,
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_reset_ttl(),
            rate_window_secs: default_rate_window(),
            rate_limit: default_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_from")]
    pub from: String,
    /// Provider HTTP endpoint for outbound mail. None disables sending
    /// (reset emails are logged instead).
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Upper bound on a single provider call; the reset request path never
    /// waits longer than this.
    #[serde(default = "default_email_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: default_email_from(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_email_timeout(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_token_secret() -> String {
    "change-me".to_string()
}
fn default_token_ttl() -> u64 {
    24 * 60 * 60
}
fn default_issuer() -> String {
    "relay".to_string()
}
fn default_audience() -> String {
    "relay-clients".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.db", home)
}
fn default_messages_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/messages.db", home)
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_drain_secs() -> u64 {
    10
}
fn default_cleanup_interval() -> u64 {
    60 * 60
}
fn default_retention_days() -> i64 {
    30
}
fn default_reset_ttl() -> u64 {
    30 * 60
}
fn default_rate_window() -> u64 {
    60 * 60
}
fn default_rate_limit() -> u32 {
    5
}
fn default_email_from() -> String {
    "no-reply@relay.local".to_string()
}
fn default_email_timeout() -> u64 {
    5
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}

/// Identifier for this running process. Multiple instances behind a load
/// balancer each carry their own id so session bindings can name the
/// instance holding a user's connection.
pub fn instance_id() -> String {
    std::env::var("SERVER_ID").unwrap_or_else(|_| "server-1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.pipeline.queue_capacity, 10_000);
        assert_eq!(cfg.cleanup.retention_days, 30);
        assert_eq!(cfg.reset.token_ttl_secs, 30 * 60);
        assert_eq!(cfg.reset.rate_limit, 5);
        assert_eq!(cfg.realtime.idle_timeout_secs, 60);
    }

    #[test]
    fn instance_id_defaults_to_server_1() {
        // SERVER_ID is unset in the test environment
        if std::env::var("SERVER_ID").is_err() {
            assert_eq!(instance_id(), "server-1");
        }
    }
}
