//! # Kubernetes Events
//!
//! Events recorded on workloads so `kubectl describe` shows why pods were
//! rolled or why a reconcile keeps failing.
//!
//! Publishing never fails the reconcile: errors from the API server are
//! logged and dropped.

use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// The configuration fingerprint changed and the pod template was updated
    pub const CONFIG_CHANGED: &str = "ConfigChanged";
    /// Reconciliation failed and will be retried (or was abandoned)
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    pub const ROLLOUT: &str = "Rollout";
    pub const RECONCILE: &str = "Reconcile";
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event about `regarding`, logging instead of failing
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by the kube-runtime event recorder
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(
                reason,
                action,
                error = %e,
                "⚠️  Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// One event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Publisher that keeps events in memory so tests can assert on them
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reasons of all captured events, oldest first
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|event| event.reason).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        let object = format!(
            "{}/{}",
            regarding.namespace.as_deref().unwrap_or_default(),
            regarding.name.as_deref().unwrap_or_default()
        );
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                object,
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                note,
            });
    }
}
