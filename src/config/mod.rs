//! Client configuration loaded from environment.

use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

/// Client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST base URL (e.g. `http://localhost:8000`). The WebSocket base is derived from it.
    pub api_base_url: String,
    /// Family the live channel is scoped to.
    pub family_id: String,
    /// Optional chat for a message-stream channel.
    pub chat_id: Option<String>,
    /// Username matched against `mentions` in mention events.
    pub me_username: String,
    /// Session token sent as the `lentik_session` cookie.
    pub session_token: Option<String>,
    /// Interval between liveness pings.
    pub ping_interval: Duration,
    /// How long a toast stays queued before expiring.
    pub toast_ttl: Duration,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let api_base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        ws_base_url(&api_base_url)?;

        let family_id =
            non_empty_var("FAMILY_ID").ok_or(ConfigLoadError::Missing("FAMILY_ID"))?;
        let chat_id = non_empty_var("CHAT_ID");
        let me_username =
            non_empty_var("ME_USERNAME").ok_or(ConfigLoadError::Missing("ME_USERNAME"))?;
        let session_token = non_empty_var("SESSION_TOKEN");

        let ping_interval = secs_var("PING_INTERVAL_SECS", 30)?;
        let toast_ttl = secs_var("TOAST_TTL_SECS", 5)?;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            family_id,
            chat_id,
            me_username,
            session_token,
            ping_interval,
            toast_ttl,
            log_level,
        })
    }

    /// WebSocket base URL matching `api_base_url`.
    pub fn ws_base_url(&self) -> Result<String, ConfigLoadError> {
        ws_base_url(&self.api_base_url)
    }
}

/// Map `http://` to `ws://` and `https://` to `wss://`.
pub fn ws_base_url(api_base_url: &str) -> Result<String, ConfigLoadError> {
    let base = api_base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(ConfigLoadError::InvalidUrl(api_base_url.to_string()))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigLoadError> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigLoadError::InvalidNumber(name)),
        None => Ok(Duration::from_secs(default)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Missing {0}")]
    Missing(&'static str),

    #[error("API_BASE_URL must start with http:// or https://, got {0}")]
    InvalidUrl(String),

    #[error("Invalid {0}: expected a positive number of seconds")]
    InvalidNumber(&'static str),
}
