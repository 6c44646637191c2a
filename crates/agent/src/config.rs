//! Agent configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use servicedesk_core::backoff::ReconnectPolicy;
use servicedesk_core::types::DbId;
use servicedesk_realtime::ConnectionConfig;

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// REST root, e.g. `https://desk.example.com/api`.
    pub api_base_url: String,
    /// WebSocket root, e.g. `wss://desk.example.com/ws`.
    pub ws_base_url: String,
    pub user_id: DbId,
    /// Bearer token for REST and the socket `token` query parameter.
    pub auth_token: Option<String>,
    /// Conversation to follow, if any.
    pub conversation_id: Option<String>,
    /// Attachment to convert and preview, if any.
    pub preview_attachment_id: Option<DbId>,
    pub reconnect_max_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub keepalive_interval: Duration,
    pub log_format: LogFormat,
}

impl AgentConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        Ok(Self {
            api_base_url: required("API_BASE_URL")?,
            ws_base_url: required("WS_BASE_URL")?,
            user_id: parse("USER_ID", required("USER_ID")?)?,
            auth_token: get("AUTH_TOKEN"),
            conversation_id: get("CONVERSATION_ID"),
            preview_attachment_id: get("PREVIEW_ATTACHMENT_ID")
                .map(|v| parse("PREVIEW_ATTACHMENT_ID", v))
                .transpose()?,
            reconnect_max_attempts: parse_or("RECONNECT_MAX_ATTEMPTS", get("RECONNECT_MAX_ATTEMPTS"), 5)?,
            reconnect_base_delay: Duration::from_millis(parse_or(
                "RECONNECT_BASE_DELAY_MS",
                get("RECONNECT_BASE_DELAY_MS"),
                1000,
            )?),
            reconnect_max_delay: Duration::from_millis(parse_or(
                "RECONNECT_MAX_DELAY_MS",
                get("RECONNECT_MAX_DELAY_MS"),
                30_000,
            )?),
            keepalive_interval: Duration::from_secs(non_zero(
                "KEEPALIVE_INTERVAL_SECS",
                parse_or("KEEPALIVE_INTERVAL_SECS", get("KEEPALIVE_INTERVAL_SECS"), 30)?,
            )?),
            log_format: parse_or("LOG_FORMAT", get("LOG_FORMAT"), LogFormat::Pretty)?,
        })
    }

    /// Per-channel connection tuning derived from this config.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect: ReconnectPolicy::new(
                self.reconnect_base_delay,
                self.reconnect_max_delay,
                self.reconnect_max_attempts,
            ),
            keepalive_interval: self.keepalive_interval,
        }
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |v| parse(key, v))
}

fn non_zero(key: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
