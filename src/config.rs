//! Environment-driven configuration with sensible local defaults.
//! Only the OAuth client credentials are strictly required; everything
//! else falls back to values that work for a local run.

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OAuth client id issued by the platform for this app.
    pub client_id: String,
    /// OAuth client secret; also the HMAC key for signed SSO payloads.
    pub client_secret: String,
    /// Platform token endpoint for the authorization-code exchange.
    pub token_url: String,
    /// Public base URL of this app; the install redirect URI hangs off it.
    pub app_url: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub database_path: String,
    /// Upper bound on the token exchange round trip.
    pub exchange_timeout: Duration,
    pub session_ttl: Duration,
    /// Reject SSO payloads whose issued-at is older than this window.
    /// `None` disables the check; the platform publishes no expiry.
    pub payload_max_age: Option<Duration>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let client_id =
            std::env::var("STOREGATE_CLIENT_ID").context("STOREGATE_CLIENT_ID is required")?;
        let client_secret = std::env::var("STOREGATE_CLIENT_SECRET")
            .context("STOREGATE_CLIENT_SECRET is required")?;
        let listen_port: u16 = env_or("STOREGATE_LISTEN_PORT", "7878")
            .parse()
            .context("STOREGATE_LISTEN_PORT must be a port number")?;
        let exchange_timeout_secs: u64 = env_or("STOREGATE_EXCHANGE_TIMEOUT_SECS", "10")
            .parse()
            .context("STOREGATE_EXCHANGE_TIMEOUT_SECS must be an integer")?;
        let session_ttl_secs: u64 = env_or("STOREGATE_SESSION_TTL_SECS", "3600")
            .parse()
            .context("STOREGATE_SESSION_TTL_SECS must be an integer")?;
        let payload_max_age = std::env::var("STOREGATE_PAYLOAD_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        Ok(Self {
            client_id,
            client_secret,
            token_url: env_or(
                "STOREGATE_TOKEN_URL",
                "https://login.bigcommerce.com/oauth2/token",
            ),
            app_url: env_or("STOREGATE_APP_URL", "http://localhost:7878"),
            listen_host: env_or("STOREGATE_LISTEN_HOST", "0.0.0.0"),
            listen_port,
            database_path: env_or("STOREGATE_DATABASE_PATH", "data/storegate.db"),
            exchange_timeout: Duration::from_secs(exchange_timeout_secs),
            session_ttl: Duration::from_secs(session_ttl_secs),
            payload_max_age,
        })
    }

    /// The redirect URI registered with the platform for install callbacks.
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/install", self.app_url.trim_end_matches('/'))
    }
}
