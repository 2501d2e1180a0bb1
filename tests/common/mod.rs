//! Common test fixtures
//!
//! Builds ConfigMaps, Secrets and workloads the way the API server would
//! return them and loads them into a `MemoryStore`.

#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use config_rollout_controller::constants::UPDATE_ON_CONFIG_CHANGE_ANNOTATION;
use config_rollout_controller::store::{ChildRef, ConfigSource, MemoryStore};
use config_rollout_controller::workload::ManagedWorkload;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, EnvFromSource, PodSpec,
    PodTemplateSpec, Secret, SecretEnvSource, SecretVolumeSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "default";

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..ObjectMeta::default()
    }
}

pub fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: meta(name),
        data: Some(
            data.iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
        ),
        ..ConfigMap::default()
    }
}

pub fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(name),
        data: Some(
            data.iter()
                .map(|(key, value)| ((*key).to_string(), ByteString(value.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

pub fn cm1() -> ConfigSource {
    ConfigSource::from_config_map(&config_map("example1", &[("key1", "example1:key1")])).unwrap()
}

pub fn cm2() -> ConfigSource {
    ConfigSource::from_config_map(&config_map(
        "example2",
        &[("key1", "example2:key1"), ("key2", "example2:key2")],
    ))
    .unwrap()
}

pub fn s1() -> ConfigSource {
    ConfigSource::from_secret(&secret("example1", &[("key1", "example1:key1")])).unwrap()
}

pub fn s2() -> ConfigSource {
    ConfigSource::from_secret(&secret(
        "example2",
        &[("key1", "example2:key1"), ("key2", "example2:key2")],
    ))
    .unwrap()
}

pub fn cm1_ref() -> ChildRef {
    ChildRef::config_map(NAMESPACE, "example1")
}

pub fn cm2_ref() -> ChildRef {
    ChildRef::config_map(NAMESPACE, "example2")
}

pub fn s1_ref() -> ChildRef {
    ChildRef::secret(NAMESPACE, "example1")
}

pub fn s2_ref() -> ChildRef {
    ChildRef::secret(NAMESPACE, "example2")
}

pub fn config_map_volume(name: &str) -> Volume {
    Volume {
        name: format!("configmap-{name}"),
        config_map: Some(ConfigMapVolumeSource {
            name: name.to_string(),
            ..ConfigMapVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub fn secret_volume(name: &str) -> Volume {
    Volume {
        name: format!("secret-{name}"),
        secret: Some(SecretVolumeSource {
            secret_name: Some(name.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    }
}

pub fn config_map_env_from(name: &str) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: name.to_string(),
            optional: None,
        }),
        ..EnvFromSource::default()
    }
}

pub fn secret_env_from(name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: name.to_string(),
            optional: None,
        }),
        ..EnvFromSource::default()
    }
}

/// Opted-in Deployment mounting cm1 and s1 and loading cm2 and s2 through envFrom
pub fn example_deployment() -> Deployment {
    deployment(
        "example",
        "uid-example",
        vec![config_map_volume("example1"), secret_volume("example1")],
        vec![config_map_env_from("example2"), secret_env_from("example2")],
    )
}

pub fn deployment(
    name: &str,
    uid: &str,
    volumes: Vec<Volume>,
    env_from: Vec<EnvFromSource>,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            uid: Some(uid.to_string()),
            annotations: Some(BTreeMap::from([(
                UPDATE_ON_CONFIG_CHANGE_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..meta(name)
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some("nginx:1.27".to_string()),
                        env_from: Some(env_from),
                        ..Container::default()
                    }],
                    volumes: Some(volumes),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Store every example child
pub fn seed_children(store: &MemoryStore) {
    for child in [cm1(), cm2(), s1(), s2()] {
        store.insert_child(child);
    }
}

/// Store the workload and return the snapshot the reconciler works from
pub fn register(store: &MemoryStore, deployment: &Deployment) -> ManagedWorkload {
    store.insert_workload(ManagedWorkload::from_resource(deployment).unwrap())
}

/// Latest stored snapshot of `workload`, as the next watch event would deliver it
pub fn refreshed(store: &MemoryStore, workload: &ManagedWorkload) -> ManagedWorkload {
    store.workload(workload).unwrap()
}

/// Owner reference belonging to some other controller
pub fn foreign_owner() -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "ReplicaSet".to_string(),
        name: "unrelated".to_string(),
        uid: "uid-unrelated".to_string(),
        controller: Some(true),
        block_owner_deletion: None,
    }
}
