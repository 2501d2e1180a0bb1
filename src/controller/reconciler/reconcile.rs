//! # Reconciliation Logic
//!
//! One pass of the pipeline for a single workload:
//!
//! 1. Extract the ConfigMaps/Secrets its pod template references
//! 2. Fetch them all (a missing one aborts the pass before any write)
//! 3. Put the finalizer on the workload
//! 4. Find the children that already carry its owner reference
//! 5. Add and remove owner references so the two sets match
//! 6. Fingerprint the referenced content
//! 7. Write the fingerprint into the pod template when it changed
//!
//! Workloads that are being deleted or have opted out go through
//! [`release_children`] instead.
//!
//! Errors are returned to the error policy, which owns requeue and backoff.

use crate::controller::events::{actions, reasons};
use crate::controller::reconciler::children::{
    get_current_children, get_existing_children, update_owner_references, OwnershipChanges,
};
use crate::controller::reconciler::finalizer::{add_finalizer, remove_finalizer};
use crate::controller::reconciler::hash::calculate_config_hash;
use crate::controller::reconciler::references::get_child_names_by_type;
use crate::controller::reconciler::restart::update_hash_annotation;
use crate::controller::reconciler::types::{backoff_key, Reconciler, ReconcilerError, TriggerSource};
use crate::observability;
use crate::store::ObjectStore;
use crate::workload::{ManagedWorkload, Workload};
use kube::runtime::events::EventType;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// What a pipeline pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Number of children the template references
    pub children: usize,
    pub ownership: OwnershipChanges,
    /// Fingerprint of the referenced content, `None` when the workload is not managed
    pub hash: Option<String>,
    /// Whether the pod template annotation was written
    pub restarted: bool,
    /// Whether the finalizer was added or removed
    pub finalizer_changed: bool,
}

impl ReconcileOutcome {
    /// Total number of writes performed
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.ownership.total() + usize::from(self.restarted) + usize::from(self.finalizer_changed)
    }
}

/// Run the full pipeline for a managed workload
pub async fn reconcile_workload(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    max_conflict_retries: u32,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let desired = get_child_names_by_type(&workload.template);
    debug!(
        config_maps = desired.config_maps.len(),
        secrets = desired.secrets.len(),
        "Extracted references from pod template"
    );

    let current = get_current_children(store, workload, &desired).await?;
    // The finalizer has to be in place before the first owner reference is written
    let (workload, finalizer_changed) =
        add_finalizer(store, workload, max_conflict_retries).await?;
    let existing = get_existing_children(store, &workload).await?;
    let ownership =
        update_owner_references(store, &workload, &current, &existing, max_conflict_retries)
            .await?;

    let hash = calculate_config_hash(&current);
    let restarted = update_hash_annotation(store, &workload, &hash, max_conflict_retries).await?;

    Ok(ReconcileOutcome {
        children: current.len(),
        ownership,
        hash: Some(hash),
        restarted,
        finalizer_changed,
    })
}

/// Drop the workload's owner references from every child it owns, then its finalizer
///
/// Used when a workload opts out or is being deleted. The fingerprint
/// annotation is left as is. A workload without the finalizer owns nothing,
/// since owner references are only ever written after it, and is skipped
/// without listing its namespace.
pub async fn release_children(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    max_conflict_retries: u32,
) -> Result<ReconcileOutcome, ReconcilerError> {
    if !workload.has_finalizer() {
        return Ok(ReconcileOutcome::default());
    }

    let existing = get_existing_children(store, workload).await?;
    let ownership = if existing.is_empty() {
        OwnershipChanges::default()
    } else {
        update_owner_references(store, workload, &[], &existing, max_conflict_retries).await?
    };
    let finalizer_changed = remove_finalizer(store, workload, max_conflict_retries).await?;

    if !ownership.is_empty() || finalizer_changed {
        info!(
            removed = ownership.removed.len(),
            "🔗 Released children of {} {}",
            workload.kind,
            workload.key()
        );
    }
    Ok(ReconcileOutcome {
        ownership,
        finalizer_changed,
        ..ReconcileOutcome::default()
    })
}

/// Reconcile entry point handed to the kube-runtime `Controller`
///
/// Errors are handled by the error policy; this function only records them.
pub async fn reconcile<K: Workload>(
    obj: Arc<K>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let kind = K::KIND;
    observability::increment_reconciliations(kind.as_str());

    let workload = match ManagedWorkload::from_resource(obj.as_ref()) {
        Ok(workload) => workload,
        Err(e) => {
            observability::increment_reconciliation_errors(kind.as_str(), e.as_str());
            return Err(e);
        }
    };

    let span = tracing::span!(
        tracing::Level::INFO,
        "reconcile",
        resource.kind = %kind,
        resource.namespace = %workload.namespace,
        resource.name = %workload.name
    );

    async move {
        if workload.deleting && !workload.has_finalizer() {
            debug!("Workload is being deleted and holds nothing, skipping");
            return Ok(Action::await_change());
        }

        let config = ctx.controller_config.read().await.clone();
        let key = backoff_key(kind, &workload.namespace, &workload.name);
        let trigger_source = if ctx.is_backing_off(&key) {
            TriggerSource::ErrorBackoff
        } else {
            TriggerSource::Watch
        };
        info!(
            "🔄 Reconciling {} {} (trigger source: {})",
            kind,
            workload.key(),
            trigger_source.as_str()
        );

        let managed = !config.require_opt_in || workload.is_opted_in();
        let result = if workload.deleting {
            debug!("Workload is being deleted, releasing its children");
            release_children(ctx.store.as_ref(), &workload, config.max_conflict_retries).await
        } else if managed {
            reconcile_workload(ctx.store.as_ref(), &workload, config.max_conflict_retries).await
        } else {
            debug!("Workload has not opted in to config-driven rollouts");
            release_children(ctx.store.as_ref(), &workload, config.max_conflict_retries).await
        };
        observability::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                ctx.reset_backoff(&key);
                record_success(&ctx, &workload, &outcome).await;
                Ok(Action::await_change())
            }
            Err(e) => {
                observability::increment_reconciliation_errors(kind.as_str(), e.as_str());
                warn!(error = %e, "❌ Reconciliation of {} {} failed", kind, workload.key());
                ctx.events
                    .publish(
                        &workload.object_reference(),
                        EventType::Warning,
                        reasons::RECONCILE_FAILED,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn record_success(ctx: &Reconciler, workload: &ManagedWorkload, outcome: &ReconcileOutcome) {
    let kind = workload.kind.as_str();
    observability::increment_owner_references_added(outcome.ownership.added.len());
    observability::increment_owner_references_removed(outcome.ownership.removed.len());
    if outcome.hash.is_some() {
        observability::observe_children_per_reconcile(kind, outcome.children);
    }

    if outcome.restarted {
        observability::increment_restarts_triggered(kind);
        let hash = outcome.hash.as_deref().unwrap_or_default();
        ctx.events
            .publish(
                &workload.object_reference(),
                EventType::Normal,
                reasons::CONFIG_CHANGED,
                actions::ROLLOUT,
                Some(format!("Configuration fingerprint changed to {hash}")),
            )
            .await;
    }

    info!(
        children = outcome.children,
        owners_added = outcome.ownership.added.len(),
        owners_removed = outcome.ownership.removed.len(),
        hash = outcome.hash.as_deref().unwrap_or("-"),
        restarted = outcome.restarted,
        "✅ Reconciled {} {}",
        workload.kind,
        workload.key()
    );
}
