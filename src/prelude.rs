//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use config_rollout_controller::prelude::*;
//! ```
//!
//! This brings into scope:
//! - Workload types (`Workload`, `ManagedWorkload`, `WorkloadKind`)
//! - Store types (`ObjectStore`, `ConfigSource`, `ChildRef`, `StoreError`)
//! - Reconciler types (`Reconciler`, `ReconcilerError`, pipeline functions)
//! - Config types (`ControllerConfig`, `ServerConfig`)

// Workload types
pub use crate::workload::{ManagedWorkload, Workload, WorkloadKind};

// Store types - the engine's only view of the cluster
pub use crate::store::{
    ChildKind, ChildRef, ClusterStore, ConfigSource, MemoryStore, ObjectStore, StoreError,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    calculate_config_hash, get_child_names_by_type, get_current_children, get_existing_children,
    is_owned_by, reconcile, reconcile_workload, release_children, update_hash_annotation,
    update_owner_references, DesiredChildren, OwnerIndex, OwnershipChanges, ReconcileOutcome,
    Reconciler, ReconcilerError,
};

// Event publishing
pub use crate::controller::events::{
    EventPublisher, KubeEventPublisher, NoopEventPublisher, RecordingEventPublisher,
};

// Config types - for configuration management
pub use crate::config::{
    ControllerConfig, ServerConfig, SharedControllerConfig, SharedServerConfig,
};
