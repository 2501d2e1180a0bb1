//! # Restart Trigger
//!
//! Propagates a new configuration fingerprint into the workload's pod
//! template. Changing a template annotation is what makes the workload
//! controller roll the pods; nothing else on the workload is written.

use crate::constants::CONFIG_HASH_ANNOTATION;
use crate::controller::reconciler::types::ReconcilerError;
use crate::store::{ObjectStore, StoreError};
use crate::workload::ManagedWorkload;
use tracing::{debug, info};

/// Whether the workload's recorded fingerprint differs from `hash`
#[must_use]
pub fn needs_restart(workload: &ManagedWorkload, hash: &str) -> bool {
    workload.template_annotation(CONFIG_HASH_ANNOTATION) != Some(hash)
}

/// Write `hash` into the pod template annotation when it changed
///
/// Returns whether a write happened. The write is guarded by the workload's
/// resource version. On a conflict the workload is read again and the
/// comparison repeated against the fresh template, up to `max_retries` times.
pub async fn update_hash_annotation(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    hash: &str,
    max_retries: u32,
) -> Result<bool, ReconcilerError> {
    let mut current = workload.clone();
    let mut attempts = 0;
    loop {
        if !needs_restart(&current, hash) {
            debug!(hash, "Configuration fingerprint unchanged");
            return Ok(false);
        }

        attempts += 1;
        match store
            .set_template_annotation(&current, CONFIG_HASH_ANNOTATION, hash)
            .await
        {
            Ok(()) => break,
            Err(StoreError::Conflict(resource)) => {
                if attempts > max_retries {
                    return Err(ReconcilerError::Conflict { resource, attempts });
                }
                debug!(attempt = attempts, "Conflict writing fingerprint, re-reading workload");
                current = store.get_workload(&current).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        previous = current.template_annotation(CONFIG_HASH_ANNOTATION).unwrap_or("<none>"),
        hash,
        "🔄 Configuration changed, rolling {} {}",
        current.kind,
        current.key()
    );
    Ok(true)
}
