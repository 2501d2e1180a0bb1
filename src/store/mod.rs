//! # Object Store
//!
//! The narrow slice of the cluster the reconciliation engine talks to.
//!
//! - `cluster`: `ObjectStore` backed by the Kubernetes API via kube-rs
//! - `memory`: in-memory `ObjectStore` with resource-version semantics
//!
//! Every write carries the resource version it was derived from, so a
//! concurrent writer turns the update into [`StoreError::Conflict`] instead
//! of a lost update. Nothing in this module retries.

pub mod cluster;
pub mod memory;

pub use cluster::ClusterStore;
pub use memory::MemoryStore;

use crate::workload::ManagedWorkload;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Kinds of configuration objects a workload can depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    ConfigMap,
    Secret,
}

impl ChildKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::ConfigMap => "ConfigMap",
            ChildKind::Secret => "Secret",
        }
    }
}

/// Identity of a ConfigMap or Secret
///
/// Ordering is by kind, then namespace, then name. The fingerprint relies on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildRef {
    pub kind: ChildKind,
    pub namespace: String,
    pub name: String,
}

impl ChildRef {
    pub fn new(kind: ChildKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn config_map(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ChildKind::ConfigMap, namespace, name)
    }

    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ChildKind::Secret, namespace, name)
    }
}

impl fmt::Display for ChildRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind.as_str(), self.namespace, self.name)
    }
}

/// A ConfigMap or Secret reduced to what the engine reads and writes
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub id: ChildRef,
    pub resource_version: Option<String>,
    /// Content keyed by data key; ConfigMap `data`/`binaryData` and Secret `data`/`stringData` merged
    pub data: BTreeMap<String, Vec<u8>>,
    pub owner_references: Vec<OwnerReference>,
}

impl ConfigSource {
    pub fn new(id: ChildRef) -> Self {
        Self {
            id,
            resource_version: None,
            data: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    /// Builder-style helper for a single content entry
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Builder-style helper for a single owner reference
    #[must_use]
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.owner_references.push(owner);
        self
    }

    /// Whether any owner reference points at `uid`
    #[must_use]
    pub fn has_owner(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|owner| owner.uid == uid)
    }

    /// Convert a ConfigMap, `None` when it lacks a name or namespace
    #[must_use]
    pub fn from_config_map(config_map: &ConfigMap) -> Option<Self> {
        let meta = &config_map.metadata;
        let id = ChildRef::config_map(meta.namespace.clone()?, meta.name.clone()?);

        let mut data: BTreeMap<String, Vec<u8>> = config_map
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), value.clone().into_bytes()))
            .collect();
        for (key, value) in config_map.binary_data.iter().flatten() {
            data.insert(key.clone(), value.0.clone());
        }

        Some(Self {
            id,
            resource_version: meta.resource_version.clone(),
            data,
            owner_references: meta.owner_references.clone().unwrap_or_default(),
        })
    }

    /// Convert a Secret, `None` when it lacks a name or namespace
    #[must_use]
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let meta = &secret.metadata;
        let id = ChildRef::secret(meta.namespace.clone()?, meta.name.clone()?);

        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .iter()
            .flatten()
            .map(|(key, value)| (key.clone(), value.0.clone()))
            .collect();
        // stringData is write-only on the API server but can appear on objects built locally
        for (key, value) in secret.string_data.iter().flatten() {
            data.insert(key.clone(), value.clone().into_bytes());
        }

        Some(Self {
            id,
            resource_version: meta.resource_version.clone(),
            data,
            owner_references: meta.owner_references.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict writing {0}: the object was modified concurrently")]
    Conflict(String),
    #[error("{0} has no name or namespace")]
    Invalid(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    /// Classify an API error for the object described by `what`
    pub fn from_kube(err: kube::Error, what: impl fmt::Display) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(what.to_string()),
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(what.to_string()),
            other => Self::Kube(other),
        }
    }
}

/// Operations the reconciliation engine needs from the cluster
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read one ConfigMap or Secret
    async fn get_child(&self, id: &ChildRef) -> Result<ConfigSource, StoreError>;

    /// List every ConfigMap and Secret in a namespace
    async fn list_children(&self, namespace: &str) -> Result<Vec<ConfigSource>, StoreError>;

    /// Persist the owner references of `child`, guarded by its resource version
    async fn update_child(&self, child: &ConfigSource) -> Result<ConfigSource, StoreError>;

    /// Read the current state of a workload
    async fn get_workload(&self, workload: &ManagedWorkload) -> Result<ManagedWorkload, StoreError>;

    /// Set one annotation on the workload's pod template, guarded by its resource version
    async fn set_template_annotation(
        &self,
        workload: &ManagedWorkload,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    /// Replace the workload's finalizers, guarded by its resource version
    ///
    /// Returns the workload as stored afterwards, so later writes in the same
    /// pass carry the new resource version.
    async fn set_finalizers(
        &self,
        workload: &ManagedWorkload,
        finalizers: &[String],
    ) -> Result<ManagedWorkload, StoreError>;

    /// Children in `namespace` carrying an owner reference with `uid`
    async fn list_owned_by(
        &self,
        namespace: &str,
        uid: &str,
    ) -> Result<Vec<ConfigSource>, StoreError> {
        let children = self.list_children(namespace).await?;
        Ok(children
            .into_iter()
            .filter(|child| child.has_owner(uid))
            .collect())
    }
}
