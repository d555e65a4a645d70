use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_APP_URL: &str = "";
const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Runtime configuration, loaded once at startup from `COINCAST_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    /// Base URL of the mini-app, used as `targetUrl` in push notifications.
    pub app_url: String,
    /// Where the registry document lives on disk. `None` keeps state in memory.
    pub store_path: Option<PathBuf>,
    pub notify_timeout_ms: u64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid COINCAST_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("COINCAST_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = env::var("COINCAST_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let app_url = env::var("COINCAST_APP_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_APP_URL.to_string());

        let store_path = env::var("COINCAST_STORE_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let notify_timeout_ms = env::var("COINCAST_NOTIFY_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS);

        let request_timeout_seconds = env::var("COINCAST_REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);

        Ok(Self {
            bind_addr,
            log_filter,
            app_url,
            store_path,
            notify_timeout_ms,
            request_timeout_seconds,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            app_url: "https://coincast.test".to_string(),
            store_path: None,
            notify_timeout_ms: 1_000,
            request_timeout_seconds: 5,
        }
    }
}
