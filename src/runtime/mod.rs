//! # Runtime
//!
//! Process-level wiring for the controller binary.
//!
//! - `initialization`: rustls, tracing, metrics, HTTP server and client setup
//! - `watch_loop`: one kube-runtime `Controller` per workload kind
//! - `error_policy`: requeue backoff and watch error reporting

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
