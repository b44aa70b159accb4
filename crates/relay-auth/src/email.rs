use async_trait::async_trait;
use relay_core::config::EmailConfig;
use serde_json::json;
use tracing::info;

/// Outbound mail seam. The provider itself is out of scope; this trait is
/// where it plugs in.
#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String>;
}

/// JSON POST to a provider endpoint, bearer-authenticated.
pub struct HttpEmailGateway {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
}

impl HttpEmailGateway {
    pub fn new(config: &EmailConfig, endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        }
    }

    /// Build from config; None when no endpoint is configured.
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        config
            .endpoint
            .clone()
            .map(|endpoint| Self::new(config, endpoint))
    }
}

#[async_trait]
impl EmailGateway for HttpEmailGateway {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "body": body,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("provider returned {}", response.status()))
        }
    }
}

/// No provider configured: log the send and succeed. Keeps development
/// setups working without leaking reset links anywhere but the log.
pub struct NoopEmailGateway;

#[async_trait]
impl EmailGateway for NoopEmailGateway {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), String> {
        info!(to, subject, "email gateway disabled, dropping message");
        Ok(())
    }
}
