//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// First requeue delay after a retryable reconciliation failure (seconds)
    pub backoff_start_secs: u64,
    /// Maximum requeue delay after repeated failures (seconds)
    pub backoff_max_secs: u64,
    /// How many times an owner reference update is re-read and retried after a conflict
    pub max_conflict_retries: u32,
    /// Maximum concurrent reconciliations per workload kind
    pub max_concurrent_reconciliations: u16,
    /// Only manage workloads carrying the opt-in annotation
    pub require_opt_in: bool,
    /// Restrict watches to a single namespace (all namespaces when unset)
    pub watch_namespace: Option<String>,
    /// Controller restart delay after a watch stream ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            require_opt_in: true,
            watch_namespace: None,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Used by `from_env` and by tests, which cannot safely mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        use crate::constants::*;
        let watch_namespace = lookup("WATCH_NAMESPACE")
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty());

        Self {
            backoff_start_secs: parse_or_default(
                lookup("BACKOFF_START_SECS"),
                DEFAULT_BACKOFF_START_SECS,
            ),
            backoff_max_secs: parse_or_default(lookup("BACKOFF_MAX_SECS"), DEFAULT_BACKOFF_MAX_SECS),
            max_conflict_retries: parse_or_default(
                lookup("MAX_CONFLICT_RETRIES"),
                DEFAULT_MAX_CONFLICT_RETRIES,
            ),
            max_concurrent_reconciliations: parse_or_default(
                lookup("MAX_CONCURRENT_RECONCILIATIONS"),
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            require_opt_in: parse_bool_or_default(lookup("REQUIRE_OPT_IN"), true),
            watch_namespace,
            watch_restart_delay_secs: parse_or_default(
                lookup("WATCH_RESTART_DELAY_SECS"),
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            log_format: lookup("LOG_FORMAT").unwrap_or_else(|| "json".to_string()),
        }
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Parse an optional value or return default value
pub(crate) fn parse_or_default<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parse an optional value as boolean or return default
fn parse_bool_or_default(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}
