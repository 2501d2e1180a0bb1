//! # Workloads
//!
//! The reconciliation pipeline is written once against [`ManagedWorkload`].
//! Each supported kind (Deployment, DaemonSet, StatefulSet) implements the
//! [`Workload`] capability trait, which is all the controller needs to turn a
//! watched object into a `ManagedWorkload`.

use crate::constants::{FINALIZER, UPDATE_ON_CONFIG_CHANGE_ANNOTATION, WORKLOAD_API_VERSION};
use crate::controller::reconciler::ReconcilerError;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ObjectReference, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Workload kinds whose pod templates the controller can roll
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl WorkloadKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set shared by every workload kind: a namespaced apps/v1 object with a pod template
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: WorkloadKind;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

impl Workload for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }
}

impl Workload for DaemonSet {
    const KIND: WorkloadKind = WorkloadKind::DaemonSet;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }
}

impl Workload for StatefulSet {
    const KIND: WorkloadKind = WorkloadKind::StatefulSet;

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|spec| &spec.template)
    }
}

/// Kind-independent snapshot of a workload as read from the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedWorkload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub resource_version: Option<String>,
    /// Object metadata annotations (not the pod template's)
    pub annotations: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
    /// Set once the API server has accepted a delete
    pub deleting: bool,
    pub template: PodTemplateSpec,
}

impl ManagedWorkload {
    /// Snapshot a watched object
    ///
    /// Fails with `MalformedWorkload` when the object has no name, namespace or UID,
    /// none of which can be repaired by retrying.
    pub fn from_resource<K: Workload>(obj: &K) -> Result<Self, ReconcilerError> {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| ReconcilerError::MalformedWorkload(format!("{} without a name", K::KIND)))?;
        let namespace = meta.namespace.clone().ok_or_else(|| {
            ReconcilerError::MalformedWorkload(format!("{} {name} without a namespace", K::KIND))
        })?;
        let uid = meta.uid.clone().filter(|uid| !uid.is_empty()).ok_or_else(|| {
            ReconcilerError::MalformedWorkload(format!("{} {namespace}/{name} without a UID", K::KIND))
        })?;

        Ok(Self {
            kind: K::KIND,
            namespace,
            name,
            uid,
            resource_version: meta.resource_version.clone(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            finalizers: meta.finalizers.clone().unwrap_or_default(),
            deleting: meta.deletion_timestamp.is_some(),
            template: obj.pod_template().cloned().unwrap_or_default(),
        })
    }

    /// `namespace/name`, used for logging and backoff bookkeeping
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Value of an annotation on the pod template
    #[must_use]
    pub fn template_annotation(&self, key: &str) -> Option<&str> {
        self.template
            .metadata
            .as_ref()
            .and_then(|meta| meta.annotations.as_ref())
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    /// Whether the workload asked to be rolled on configuration changes
    #[must_use]
    pub fn is_opted_in(&self) -> bool {
        self.annotations
            .get(UPDATE_ON_CONFIG_CHANGE_ANNOTATION)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }

    /// Whether the workload carries the controller's finalizer
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|finalizer| finalizer == FINALIZER)
    }

    /// Owner reference recorded on every child this workload depends on
    ///
    /// Never the controlling owner: children can be shared between workloads and
    /// may already have a controller of their own.
    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: WORKLOAD_API_VERSION.to_string(),
            kind: self.kind.as_str().to_string(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(false),
            block_owner_deletion: Some(true),
        }
    }

    /// Reference used when publishing events about this workload
    #[must_use]
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some(WORKLOAD_API_VERSION.to_string()),
            kind: Some(self.kind.as_str().to_string()),
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            uid: Some(self.uid.clone()),
            resource_version: self.resource_version.clone(),
            ..ObjectReference::default()
        }
    }
}
