//! Config Rollout Controller Library
//!
//! This library provides the core functionality for the config rollout controller:
//! a Kubernetes controller that rolls Deployments, DaemonSets and StatefulSets
//! whenever the ConfigMaps or Secrets they reference change.
//! Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use config_rollout_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

// Re-export modules so they can be tested
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod store;
pub mod workload;
