//! # Types
//!
//! Core types for the reconciler.

use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::events::{EventPublisher, KubeEventPublisher};
use crate::store::{ChildRef, ClusterStore, ObjectStore, StoreError};
use crate::workload::WorkloadKind;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// A referenced ConfigMap or Secret does not exist (yet)
    #[error("referenced {0} does not exist")]
    MissingChild(ChildRef),
    /// Optimistic concurrency kept failing after local retries
    #[error("gave up writing {resource} after {attempts} conflicting attempts")]
    Conflict { resource: String, attempts: u32 },
    /// Connectivity or API failure talking to the object store
    #[error("object store error: {0}")]
    Store(#[source] StoreError),
    /// The workload itself cannot be reconciled (no name, namespace or UID)
    #[error("malformed workload: {0}")]
    MalformedWorkload(String),
}

impl ReconcilerError {
    /// Whether requeueing the workload can make the error go away
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcilerError::MalformedWorkload(_))
    }

    /// Short label for metrics and event reasons
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilerError::MissingChild(_) => "missing-child",
            ReconcilerError::Conflict { .. } => "conflict",
            ReconcilerError::Store(_) => "store",
            ReconcilerError::MalformedWorkload(_) => "malformed-workload",
        }
    }
}

impl From<StoreError> for ReconcilerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(resource) => ReconcilerError::Conflict {
                resource,
                attempts: 1,
            },
            other => ReconcilerError::Store(other),
        }
    }
}

/// Trigger source for reconciliation
/// Tracks why a reconciliation was triggered for better debugging and observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Change to the workload itself, or to a ConfigMap/Secret it owns
    Watch,
    /// Requeue after a retryable failure
    ErrorBackoff,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Watch => "watch",
            TriggerSource::ErrorBackoff => "error-backoff",
        }
    }
}

/// Key identifying a workload in backoff bookkeeping
#[must_use]
pub fn backoff_key(kind: WorkloadKind, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Backoff state for a specific workload
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(start_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: ExponentialBackoff::new(start_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconciliation context handed to every reconcile and error policy call
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ObjectStore>,
    pub events: Arc<dyn EventPublisher>,
    pub controller_config: SharedControllerConfig,
    // Backoff state per workload (identified by kind/namespace/name)
    // Lives here so the error policy can grow it and a successful reconcile can clear it
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Context backed by the Kubernetes API
    #[must_use]
    pub fn new(client: Client, controller_config: SharedControllerConfig) -> Self {
        Self::with_parts(
            Arc::new(ClusterStore::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client)),
            controller_config,
        )
    }

    /// Context over arbitrary store and event implementations
    #[must_use]
    pub fn with_parts(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        controller_config: SharedControllerConfig,
    ) -> Self {
        Self {
            store,
            events,
            controller_config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Context with a fixed configuration
    #[must_use]
    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self::with_parts(store, events, Arc::new(RwLock::new(config)))
    }

    /// Record a failure for `key` and return the delay before the next attempt (seconds)
    /// together with the number of consecutive failures
    pub fn next_backoff(&self, key: &str, start_secs: u64, max_secs: u64) -> (u64, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| BackoffState::new(start_secs, max_secs));
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Forget the failure history of `key` after a successful reconcile
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }

    /// Whether `key` is currently backing off
    #[must_use]
    pub fn is_backing_off(&self, key: &str) -> bool {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
