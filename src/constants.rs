//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Pod-template annotation holding the last applied configuration fingerprint
pub const CONFIG_HASH_ANNOTATION: &str = "config-rollout.io/config-hash";

/// Workload annotation that opts a Deployment, DaemonSet or StatefulSet in
pub const UPDATE_ON_CONFIG_CHANGE_ANNOTATION: &str = "config-rollout.io/update-on-config-change";

/// Finalizer held by managed workloads until their owner references are released
pub const FINALIZER: &str = "config-rollout.io/finalizer";

/// Name reported as the event source and field manager
pub const CONTROLLER_NAME: &str = "config-rollout-controller";

/// API version shared by all managed workload kinds
pub const WORKLOAD_API_VERSION: &str = "apps/v1";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default first backoff delay after a failed reconciliation (seconds)
pub const DEFAULT_BACKOFF_START_SECS: u64 = 5;

/// Default upper bound for the reconciliation backoff (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default number of re-read-and-retry attempts after an update conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Default number of workloads reconciled in parallel per workload kind
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default delay before restarting a controller whose stream ended (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
