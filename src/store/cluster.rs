//! # Cluster Store
//!
//! `ObjectStore` over the Kubernetes API.
//!
//! Writes are JSON merge patches that include `metadata.resourceVersion`; the
//! API server rejects them with 409 when the object changed since it was read.

use super::{ChildKind, ChildRef, ConfigSource, ObjectStore, StoreError};
use crate::constants::CONTROLLER_NAME;
use crate::workload::{ManagedWorkload, Workload, WorkloadKind};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

#[derive(Clone)]
pub struct ClusterStore {
    client: Client,
}

impl std::fmt::Debug for ClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStore").finish_non_exhaustive()
    }
}

impl ClusterStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PatchParams::default()
        }
    }

    async fn patch_workload<K: Workload>(
        &self,
        workload: &ManagedWorkload,
        patch: &serde_json::Value,
    ) -> Result<ManagedWorkload, StoreError> {
        let what = format!("{} {}", workload.kind, workload.key());
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        let updated = api
            .patch(&workload.name, &Self::patch_params(), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        ManagedWorkload::from_resource(&updated)
            .map_err(|e| StoreError::Invalid(format!("{what} ({e})")))
    }

    async fn get_workload_of<K: Workload>(
        &self,
        workload: &ManagedWorkload,
    ) -> Result<ManagedWorkload, StoreError> {
        let what = format!("{} {}", workload.kind, workload.key());
        let api: Api<K> = Api::namespaced(self.client.clone(), &workload.namespace);
        let current = api
            .get(&workload.name)
            .await
            .map_err(|e| StoreError::from_kube(e, &what))?;
        ManagedWorkload::from_resource(&current)
            .map_err(|e| StoreError::Invalid(format!("{what} ({e})")))
    }

    async fn patch_any_workload(
        &self,
        workload: &ManagedWorkload,
        patch: &serde_json::Value,
    ) -> Result<ManagedWorkload, StoreError> {
        match workload.kind {
            WorkloadKind::Deployment => self.patch_workload::<Deployment>(workload, patch).await,
            WorkloadKind::DaemonSet => self.patch_workload::<DaemonSet>(workload, patch).await,
            WorkloadKind::StatefulSet => self.patch_workload::<StatefulSet>(workload, patch).await,
        }
    }
}

#[async_trait]
impl ObjectStore for ClusterStore {
    async fn get_child(&self, id: &ChildRef) -> Result<ConfigSource, StoreError> {
        let converted = match id.kind {
            ChildKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &id.namespace);
                let config_map = api
                    .get(&id.name)
                    .await
                    .map_err(|e| StoreError::from_kube(e, id))?;
                ConfigSource::from_config_map(&config_map)
            }
            ChildKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), &id.namespace);
                let secret = api
                    .get(&id.name)
                    .await
                    .map_err(|e| StoreError::from_kube(e, id))?;
                ConfigSource::from_secret(&secret)
            }
        };
        converted.ok_or_else(|| StoreError::Invalid(id.to_string()))
    }

    async fn list_children(&self, namespace: &str) -> Result<Vec<ConfigSource>, StoreError> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default();

        let config_map_list = config_maps
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("ConfigMaps in {namespace}")))?;
        let secret_list = secrets
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, format!("Secrets in {namespace}")))?;

        let children: Vec<ConfigSource> = config_map_list
            .items
            .iter()
            .filter_map(ConfigSource::from_config_map)
            .chain(secret_list.items.iter().filter_map(ConfigSource::from_secret))
            .collect();
        debug!(namespace, count = children.len(), "store.list_children");
        Ok(children)
    }

    async fn update_child(&self, child: &ConfigSource) -> Result<ConfigSource, StoreError> {
        let id = &child.id;
        let patch = json!({
            "metadata": {
                "resourceVersion": child.resource_version,
                "ownerReferences": child.owner_references,
            }
        });
        let params = Self::patch_params();

        let updated = match id.kind {
            ChildKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &id.namespace);
                let config_map = api
                    .patch(&id.name, &params, &Patch::Merge(&patch))
                    .await
                    .map_err(|e| StoreError::from_kube(e, id))?;
                ConfigSource::from_config_map(&config_map)
            }
            ChildKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), &id.namespace);
                let secret = api
                    .patch(&id.name, &params, &Patch::Merge(&patch))
                    .await
                    .map_err(|e| StoreError::from_kube(e, id))?;
                ConfigSource::from_secret(&secret)
            }
        };
        updated.ok_or_else(|| StoreError::Invalid(id.to_string()))
    }

    async fn get_workload(&self, workload: &ManagedWorkload) -> Result<ManagedWorkload, StoreError> {
        match workload.kind {
            WorkloadKind::Deployment => self.get_workload_of::<Deployment>(workload).await,
            WorkloadKind::DaemonSet => self.get_workload_of::<DaemonSet>(workload).await,
            WorkloadKind::StatefulSet => self.get_workload_of::<StatefulSet>(workload).await,
        }
    }

    async fn set_template_annotation(
        &self,
        workload: &ManagedWorkload,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let patch = json!({
            "metadata": { "resourceVersion": workload.resource_version },
            "spec": { "template": { "metadata": { "annotations": { key: value } } } }
        });
        self.patch_any_workload(workload, &patch).await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        workload: &ManagedWorkload,
        finalizers: &[String],
    ) -> Result<ManagedWorkload, StoreError> {
        // Merge patches replace lists wholesale; the resource version keeps
        // other controllers' finalizers from being dropped
        let patch = json!({
            "metadata": {
                "resourceVersion": workload.resource_version,
                "finalizers": finalizers,
            }
        });
        self.patch_any_workload(workload, &patch).await
    }
}
