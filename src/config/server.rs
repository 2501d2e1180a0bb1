//! # Server Configuration
//!
//! Settings for the metrics and probe HTTP server.

use super::controller::parse_or_default;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// How long to wait for the server to bind before giving up (seconds)
    pub startup_timeout_secs: u64,
    /// Readiness poll interval during startup (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: parse_or_default(std::env::var("METRICS_PORT").ok(), DEFAULT_METRICS_PORT),
            startup_timeout_secs: parse_or_default(
                std::env::var("SERVER_STARTUP_TIMEOUT_SECS").ok(),
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: parse_or_default(
                std::env::var("SERVER_POLL_INTERVAL_MS").ok(),
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}
