//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_BUFFER};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Events queued per connection before new ones are dropped.
    /// Env: `OUTBOUND_BUFFER`
    /// Default: `256`
    pub outbound_buffer: usize,

    /// Maximum number of concurrent live connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    /// Default: `0`
    pub max_connections: usize,

    /// Allowed CORS origin for the browser client.
    /// Env: `CORS_ORIGIN`
    /// Default: `None` (any origin).
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_connections: 0,
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("OUTBOUND_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.outbound_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid OUTBOUND_BUFFER, using default"),
            }
        }

        if let Some(val) = lookup("MAX_CONNECTIONS") {
            match val.parse::<usize>() {
                Ok(n) => config.max_connections = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_CONNECTIONS, using default"),
            }
        }

        if let Some(origin) = lookup("CORS_ORIGIN") {
            if !origin.is_empty() && origin != "*" {
                config.cors_origin = Some(origin);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.outbound_buffer, 256);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/parley.db"),
            ("MAX_CONNECTIONS", "50"),
            ("CORS_ORIGIN", "http://localhost:5173"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/parley.db")));
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:5173"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_map(&[
            ("HTTP_ADDR", "nowhere"),
            ("OUTBOUND_BUFFER", "0"),
            ("MAX_CONNECTIONS", "lots"),
            ("CORS_ORIGIN", "*"),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.outbound_buffer, 256);
        assert_eq!(config.max_connections, 0);
        assert!(config.cors_origin.is_none());
    }
}
