//! # Finalizer
//!
//! Owner references on children make Kubernetes garbage collection delete a
//! ConfigMap or Secret once every owner is gone. A managed workload therefore
//! carries a finalizer while it owns anything, and deletion waits until its
//! owner references have been released.

use crate::constants::FINALIZER;
use crate::controller::reconciler::types::ReconcilerError;
use crate::store::{ObjectStore, StoreError};
use crate::workload::ManagedWorkload;
use tracing::debug;

/// Make sure the workload carries the finalizer
///
/// Returns the snapshot to continue from and whether a write happened.
pub async fn add_finalizer(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    max_retries: u32,
) -> Result<(ManagedWorkload, bool), ReconcilerError> {
    let (updated, written) = set_finalizer_presence(store, workload, true, max_retries).await?;
    if written {
        debug!("Added finalizer to {} {}", workload.kind, workload.key());
    }
    Ok((updated, written))
}

/// Drop the finalizer, leaving any other controller's finalizers in place
///
/// Returns whether a write happened.
pub async fn remove_finalizer(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    max_retries: u32,
) -> Result<bool, ReconcilerError> {
    let (_, written) = set_finalizer_presence(store, workload, false, max_retries).await?;
    if written {
        debug!("Removed finalizer from {} {}", workload.kind, workload.key());
    }
    Ok(written)
}

/// Add or remove the finalizer, re-reading the workload on every conflict
///
/// The finalizer list is rebuilt from each fresh read, so finalizers another
/// controller added in the meantime survive.
async fn set_finalizer_presence(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    present: bool,
    max_retries: u32,
) -> Result<(ManagedWorkload, bool), ReconcilerError> {
    let mut current = workload.clone();
    let mut attempts = 0;
    loop {
        if current.has_finalizer() == present {
            return Ok((current, false));
        }

        let mut finalizers: Vec<String> = current
            .finalizers
            .iter()
            .filter(|finalizer| *finalizer != FINALIZER)
            .cloned()
            .collect();
        if present {
            finalizers.push(FINALIZER.to_string());
        }

        attempts += 1;
        match store.set_finalizers(&current, &finalizers).await {
            Ok(updated) => return Ok((updated, true)),
            Err(StoreError::Conflict(resource)) => {
                if attempts > max_retries {
                    return Err(ReconcilerError::Conflict { resource, attempts });
                }
                debug!(attempt = attempts, "Conflict writing finalizers, re-reading workload");
                current = store.get_workload(&current).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
