//! # Controller
//!
//! Core controller modules for the config rollout controller.
//!
//! - `backoff`: Exponential backoff for requeues after failures
//! - `events`: Kubernetes Events recorded on workloads
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod events;
pub mod reconciler;
pub mod server;
