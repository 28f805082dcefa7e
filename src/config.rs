use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sigcore::backoff::ReconnectPolicy;
use std::path::Path;
use std::time::Duration;

/// Client settings. Every field has a default, so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `ws://` or `wss://` origin of the signaling server.
    pub server_url: String,
    pub ws_path: String,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// How long a dial may take before it counts as a failed attempt.
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    /// An open link that receives nothing for this long is dropped.
    pub keepalive_timeout_secs: u64,
    /// How long an outgoing or accepted call may stay Connecting.
    pub call_connect_timeout_secs: u64,
    /// Number of released call ids remembered so late frames for them are ignored.
    pub retired_call_capacity: usize,
    pub api_base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3001".to_string(),
            ws_path: "/ws".to_string(),
            reconnect_base_ms: 1000,
            reconnect_max_ms: 30_000,
            connect_timeout_secs: 15,
            keepalive_interval_secs: 20,
            keepalive_timeout_secs: 60,
            call_connect_timeout_secs: 30,
            retired_call_capacity: 64,
            api_base_url: "http://127.0.0.1:3001/api/v1".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidScheme(self.server_url.clone()));
        }
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidBackoff);
        }
        if self.keepalive_interval_secs == 0
            || self.keepalive_interval_secs >= self.keepalive_timeout_secs
        {
            return Err(ConfigError::InvalidKeepalive);
        }
        Ok(())
    }

    /// The signaling endpoint with the bearer token as `token` query parameter.
    pub fn ws_url(&self, token: &str) -> Result<String, ConfigError> {
        self.validate()?;
        let base = self.server_url.trim_end_matches('/');
        let path = self.ws_path.trim_start_matches('/');
        Ok(format!(
            "{base}/{path}?token={}",
            urlencoding::encode(token)
        ))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
        )
    }

    pub fn call_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.call_connect_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_secs(self.keepalive_timeout_secs)
    }
}
