use std::path::PathBuf;
use std::time::Duration;

use anonfly_common::helpers::{normalize_server_url, ws_url_for_server};
use anonfly_common::{Error, Result};

pub const ENV_API_URL: &str = "ANONFLY_API_URL";
pub const ENV_WS_URL: &str = "ANONFLY_WS_URL";
pub const ENV_IDENTITY_PATH: &str = "ANONFLY_IDENTITY_PATH";
pub const ENV_RECONNECT_DELAY_MS: &str = "ANONFLY_RECONNECT_DELAY_MS";

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity-verification service, without trailing slash.
    pub api_base_url: String,
    /// Duplex channel endpoint; the session token is appended as `?token=`.
    pub ws_url: String,
    pub identity_path: PathBuf,
    /// Delay before the single reconnect attempt.
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Config for one server with every other setting at its default.
    pub fn for_server(api_base_url: &str) -> Result<Self> {
        let api_base_url = normalize_server_url(Some(api_base_url.to_string()));
        let ws_url = ws_url_for_server(&api_base_url)?;
        Ok(Self {
            api_base_url,
            ws_url,
            identity_path: default_identity_path(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Defaults overridden by `ANONFLY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::for_server(&normalize_server_url(env_string(ENV_API_URL)))?;
        if let Some(ws_url) = env_string(ENV_WS_URL) {
            config.ws_url = ws_url;
        }
        if let Some(path) = env_string(ENV_IDENTITY_PATH) {
            config.identity_path = PathBuf::from(path);
        }
        if let Some(raw) = env_string(ENV_RECONNECT_DELAY_MS) {
            let ms: u64 = raw.parse().map_err(|_| {
                Error::config(format!("{ENV_RECONNECT_DELAY_MS} must be milliseconds, got {raw:?}"))
            })?;
            config.reconnect_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// `<data dir>/anonfly/identity.json`, or the working directory when the
/// platform has no data dir.
pub fn default_identity_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anonfly")
        .join("identity.json")
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
