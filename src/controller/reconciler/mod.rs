//! # Reconciler
//!
//! Core reconciliation logic for Deployments, DaemonSets and StatefulSets.
//!
//! The reconciler:
//! - Extracts the ConfigMaps and Secrets a pod template references
//! - Adds its owner reference to each of them (and removes it from children
//!   the template no longer references) so changes to them re-trigger it
//! - Fingerprints their content
//! - Writes the fingerprint into a pod template annotation when it changed,
//!   which makes the workload controller roll the pods
//!
//! ## Reconciliation Flow
//!
//! 1. Release children of workloads that are being deleted or have not opted in,
//!    then drop the finalizer
//! 2. Resolve current children (all or nothing)
//! 3. Add the finalizer
//! 4. Resolve existing children (owned by the workload's UID)
//! 5. Synchronize owner references
//! 6. Compute the fingerprint and update the annotation

pub mod children;
pub mod finalizer;
pub mod hash;
pub mod index;
pub mod reconcile;
pub mod references;
pub mod restart;
pub mod types;

// Re-export public API
pub use children::{
    get_current_children, get_existing_children, is_owned_by, update_owner_references,
    OwnershipChanges,
};
pub use finalizer::{add_finalizer, remove_finalizer};
pub use hash::calculate_config_hash;
pub use index::OwnerIndex;
pub use reconcile::{reconcile, reconcile_workload, release_children, ReconcileOutcome};
pub use references::{get_child_names_by_type, DesiredChildren};
pub use restart::{needs_restart, update_hash_annotation};
pub use types::{backoff_key, BackoffState, Reconciler, ReconcilerError, TriggerSource};
