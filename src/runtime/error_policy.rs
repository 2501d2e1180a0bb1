//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::constants::{DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_START_SECS};
use crate::controller::reconciler::{backoff_key, Reconciler, ReconcilerError};
use crate::observability;
use crate::workload::Workload;
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handle reconciliation errors with exponential backoff
///
/// Backoff state is tracked per workload so one failing workload never delays
/// another. Errors that retrying cannot fix are logged and parked until the
/// workload changes.
pub fn handle_reconciliation_error<K: Workload>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or("unknown");
    let namespace = meta.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = K::KIND.as_str(),
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    if !error.is_retryable() {
        error!(
            "❌ Giving up on {} {}/{}: {} (waiting for the object to change)",
            K::KIND,
            namespace,
            name,
            error
        );
        return Action::await_change();
    }

    // The error policy is synchronous; fall back to defaults while the config is being replaced
    let (start_secs, max_secs) = ctx
        .controller_config
        .try_read()
        .map(|config| (config.backoff_start_secs, config.backoff_max_secs))
        .unwrap_or((DEFAULT_BACKOFF_START_SECS, DEFAULT_BACKOFF_MAX_SECS));

    let resource_key = backoff_key(K::KIND, namespace, name);
    let (backoff_seconds, error_count) = ctx.next_backoff(&resource_key, start_secs, max_secs);

    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));

    info!(
        "🔄 Retrying with exponential backoff: {}s (error count: {}, trigger source: error-backoff)",
        backoff_seconds, error_count
    );
    info!(
        "📅 Next retry scheduled: {} (in {}s, trigger source: error-backoff)",
        next_trigger_time.to_rfc3339(),
        backoff_seconds
    );

    observability::increment_requeues(K::KIND.as_str());
    Action::requeue(std::time::Duration::from_secs(backoff_seconds))
}

/// Broad classes of watch stream failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 403: the service account may not list or watch the resource
    Forbidden,
    /// 410: resource version too old, the watcher relists
    Expired,
    /// 429: API server throttling or storage reinitializing
    Throttled,
    /// 404: resource type or object not found
    NotFound,
    Other,
}

/// Classify a watch error from its rendered form
///
/// 404 is checked before 401 because a plain-text 404 body surfaces as a
/// deserialization error that mentions the watch failing.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorClass {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if is_not_found {
        WatchErrorClass::NotFound
    } else if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorClass::Unauthorized
    } else if error_string.contains("403") || error_string.contains("Forbidden") {
        WatchErrorClass::Forbidden
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorClass::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorClass::Throttled
    } else {
        WatchErrorClass::Other
    }
}

/// Log one item of a controller's output stream
///
/// Reconcile failures are already logged (and evented) by the reconciler, so
/// only watch and queue failures are reported at warn or above here. The
/// watchers retry on their own with backoff.
pub fn log_controller_result<K: Workload>(
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>,
) {
    match result {
        Ok((obj, action)) => {
            debug!(resource = %obj, action = ?action, "watch.event.reconciled");
        }
        Err(controller::Error::ReconcilerFailed(e, obj)) => {
            debug!(resource = %obj, error = %e, "watch.event.reconciliation_failed");
        }
        Err(controller::Error::ObjectNotFound(obj)) => {
            debug!(resource = %obj, "Object disappeared before it could be reconciled");
        }
        Err(controller::Error::QueueError(e)) => {
            let error_string = format!("{e:?}");
            match classify_watch_error(&error_string) {
                WatchErrorClass::Unauthorized => {
                    error!(
                        "❌ Watch authentication failed (401 Unauthorized) for {} - RBAC may have been revoked or token expired",
                        K::KIND
                    );
                }
                WatchErrorClass::Forbidden => {
                    error!(
                        "❌ Watch forbidden (403) for {} - check that the service account may list and watch {}s, ConfigMaps and Secrets",
                        K::KIND,
                        K::KIND
                    );
                }
                WatchErrorClass::Expired => {
                    warn!(error_type = "410", "watch.error.resource_version_expired");
                }
                WatchErrorClass::Throttled => {
                    warn!("⏳ API server throttling watches for {} (429), backing off", K::KIND);
                }
                WatchErrorClass::NotFound => {
                    warn!("Watch for {} returned 404: {}", K::KIND, error_string);
                }
                WatchErrorClass::Other => {
                    error!("Controller stream error for {}: {}", K::KIND, error_string);
                }
            }
        }
        Err(other) => {
            error!("Controller error for {}: {}", K::KIND, other);
        }
    }
}
