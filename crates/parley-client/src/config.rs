//! Client configuration loaded from environment variables.

use std::time::Duration;

use parley_shared::constants::{DEFAULT_HTTP_PORT, WS_PATH};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Parley server, without trailing slash.
    /// Env: `PARLEY_SERVER_URL`
    pub server_url: String,

    /// Timeout applied to every REST request.
    /// Env: `PARLEY_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: normalize(server_url.into()),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLEY_SERVER_URL") {
            if url.starts_with("http://") || url.starts_with("https://") {
                config.server_url = normalize(url);
            } else {
                tracing::warn!(value = %url, "Invalid PARLEY_SERVER_URL, using default");
            }
        }

        if let Some(val) = lookup("PARLEY_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => {
                    tracing::warn!(value = %val, "Invalid PARLEY_REQUEST_TIMEOUT_SECS, using default")
                }
            }
        }

        config
    }

    /// Live channel endpoint derived from the server URL.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_url.clone()
        };
        format!("{base}{WS_PATH}")
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

fn normalize(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
