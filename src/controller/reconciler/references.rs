//! # Reference Extraction
//!
//! Finds every ConfigMap and Secret a pod template depends on.
//!
//! Sources scanned:
//! - volumes: `configMap`, `secret` and the ConfigMap/Secret projections of `projected`
//! - `envFrom` of containers and init containers
//! - `env[].valueFrom` key refs of containers and init containers
//!
//! Optional references are left out: the pod starts without them, so neither
//! their presence nor their content decides whether the workload rolls.

use crate::store::{ChildKind, ChildRef};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Volume};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Names referenced by a pod template, deduplicated per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredChildren {
    pub config_maps: BTreeSet<String>,
    pub secrets: BTreeSet<String>,
}

impl DesiredChildren {
    /// Identities of every referenced child, ConfigMaps first
    #[must_use]
    pub fn refs(&self, namespace: &str) -> Vec<ChildRef> {
        self.config_maps
            .iter()
            .map(|name| ChildRef::config_map(namespace, name.as_str()))
            .chain(
                self.secrets
                    .iter()
                    .map(|name| ChildRef::secret(namespace, name.as_str())),
            )
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.config_maps.len() + self.secrets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.config_maps.is_empty() && self.secrets.is_empty()
    }

    fn add(&mut self, kind: ChildKind, name: Option<&str>, optional: Option<bool>, source: &str) {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            warn!(source, kind = kind.as_str(), "Skipping reference without a name");
            return;
        };
        if optional.unwrap_or(false) {
            debug!(source, kind = kind.as_str(), name, "Skipping optional reference");
            return;
        }
        match kind {
            ChildKind::ConfigMap => self.config_maps.insert(name.to_string()),
            ChildKind::Secret => self.secrets.insert(name.to_string()),
        };
    }

    fn add_volume(&mut self, volume: &Volume) {
        if let Some(config_map) = &volume.config_map {
            self.add(
                ChildKind::ConfigMap,
                Some(config_map.name.as_str()),
                config_map.optional,
                "volume",
            );
        }
        if let Some(secret) = &volume.secret {
            self.add(
                ChildKind::Secret,
                secret.secret_name.as_deref(),
                secret.optional,
                "volume",
            );
        }
        let projections = volume
            .projected
            .iter()
            .flat_map(|projected| projected.sources.iter().flatten());
        for projection in projections {
            if let Some(config_map) = &projection.config_map {
                self.add(
                    ChildKind::ConfigMap,
                    Some(config_map.name.as_str()),
                    config_map.optional,
                    "projected volume",
                );
            }
            if let Some(secret) = &projection.secret {
                self.add(
                    ChildKind::Secret,
                    Some(secret.name.as_str()),
                    secret.optional,
                    "projected volume",
                );
            }
        }
    }

    fn add_container(&mut self, container: &Container) {
        for env_from in container.env_from.iter().flatten() {
            if let Some(config_map) = &env_from.config_map_ref {
                self.add(
                    ChildKind::ConfigMap,
                    Some(config_map.name.as_str()),
                    config_map.optional,
                    "envFrom",
                );
            }
            if let Some(secret) = &env_from.secret_ref {
                self.add(
                    ChildKind::Secret,
                    Some(secret.name.as_str()),
                    secret.optional,
                    "envFrom",
                );
            }
        }

        let value_sources = container
            .env
            .iter()
            .flatten()
            .filter_map(|env| env.value_from.as_ref());
        for value_from in value_sources {
            if let Some(key_ref) = &value_from.config_map_key_ref {
                self.add(
                    ChildKind::ConfigMap,
                    Some(key_ref.name.as_str()),
                    key_ref.optional,
                    "env",
                );
            }
            if let Some(key_ref) = &value_from.secret_key_ref {
                self.add(
                    ChildKind::Secret,
                    Some(key_ref.name.as_str()),
                    key_ref.optional,
                    "env",
                );
            }
        }
    }

    fn add_pod_spec(&mut self, spec: &PodSpec) {
        for volume in spec.volumes.iter().flatten() {
            self.add_volume(volume);
        }
        let containers = spec
            .containers
            .iter()
            .chain(spec.init_containers.iter().flatten());
        for container in containers {
            self.add_container(container);
        }
    }
}

/// Partition the ConfigMaps and Secrets referenced by `template` by kind
///
/// Never fails; references without a name are logged and skipped.
#[must_use]
pub fn get_child_names_by_type(template: &PodTemplateSpec) -> DesiredChildren {
    let mut desired = DesiredChildren::default();
    if let Some(spec) = &template.spec {
        desired.add_pod_spec(spec);
    }
    desired
}
