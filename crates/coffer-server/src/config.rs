//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration next to a local profile.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use coffer_store::database::default_data_dir;
use coffer_store::orphans::DEFAULT_SWEEP_DELAY;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) file server. Loopback only by
    /// default since it hands out decrypted bytes.
    /// Env: `HTTP_ADDR`
    /// Default: `127.0.0.1:8787`
    pub http_addr: SocketAddr,

    /// Profile directory holding the database and every attachment root.
    /// Env: `USER_DATA_PATH`
    /// Default: the platform data directory.
    pub user_data_path: PathBuf,

    /// Delay before a deferred orphan sweep runs.
    /// Env: `ORPHAN_SWEEP_DELAY_SECS`
    /// Default: `900`
    pub orphan_sweep_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([127, 0, 0, 1], 8787).into(),
            user_data_path: default_data_dir().unwrap_or_else(|_| PathBuf::from("./coffer-data")),
            orphan_sweep_delay: DEFAULT_SWEEP_DELAY,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("USER_DATA_PATH") {
            if !path.trim().is_empty() {
                config.user_data_path = PathBuf::from(path);
            }
        }

        if let Some(val) = lookup("ORPHAN_SWEEP_DELAY_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) => config.orphan_sweep_delay = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid ORPHAN_SWEEP_DELAY_SECS, using default");
                }
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}
