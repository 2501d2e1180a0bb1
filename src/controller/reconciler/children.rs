//! # Children
//!
//! Resolution of a workload's ConfigMaps and Secrets and reconciliation of
//! the owner references that tie them to the workload.
//!
//! Ownership is what makes the controller hear about content changes: the
//! ConfigMap/Secret watches are mapped back to workloads through owner
//! references, so every child the template references must carry one and no
//! child it stopped referencing may keep one.

use crate::controller::reconciler::references::DesiredChildren;
use crate::controller::reconciler::types::ReconcilerError;
use crate::store::{ChildRef, ConfigSource, ObjectStore, StoreError};
use crate::workload::ManagedWorkload;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Fetch every child `desired` names
///
/// All or nothing: the first child that does not exist fails the whole call
/// with `MissingChild`, so callers never see a partial set.
pub async fn get_current_children(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    desired: &DesiredChildren,
) -> Result<Vec<ConfigSource>, ReconcilerError> {
    let mut children = Vec::with_capacity(desired.len());
    for id in desired.refs(&workload.namespace) {
        match store.get_child(&id).await {
            Ok(child) => children.push(child),
            Err(StoreError::NotFound(_)) => return Err(ReconcilerError::MissingChild(id)),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(children)
}

/// Children in the workload's namespace that already carry its owner reference
pub async fn get_existing_children(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
) -> Result<Vec<ConfigSource>, ReconcilerError> {
    let owned = store
        .list_owned_by(&workload.namespace, &workload.uid)
        .await?;

    let mut seen = BTreeSet::new();
    Ok(owned
        .into_iter()
        .filter(|child| seen.insert(child.id.clone()))
        .collect())
}

/// Whether `child` has an owner reference with the workload's UID
///
/// Only the UID counts: a reference with the same kind and name but a
/// different UID belongs to an earlier incarnation of the workload.
#[must_use]
pub fn is_owned_by(child: &ConfigSource, workload: &ManagedWorkload) -> bool {
    child.has_owner(&workload.uid)
}

/// Owner reference mutations performed by one synchronization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipChanges {
    pub added: Vec<ChildRef>,
    pub removed: Vec<ChildRef>,
}

impl OwnershipChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

#[derive(Debug, Clone)]
enum OwnerChange {
    Add(OwnerReference),
    Remove(String),
}

impl OwnerChange {
    /// Apply to `child` in place, returning whether anything changed
    fn apply(&self, child: &mut ConfigSource) -> bool {
        match self {
            OwnerChange::Add(owner) => {
                if child.has_owner(&owner.uid) {
                    return false;
                }
                child.owner_references.push(owner.clone());
                true
            }
            OwnerChange::Remove(uid) => {
                let before = child.owner_references.len();
                child.owner_references.retain(|owner| &owner.uid != uid);
                child.owner_references.len() != before
            }
        }
    }
}

/// Write one owner reference change, re-reading the child on every conflict
///
/// Returns whether a write happened. The change is re-evaluated against each
/// fresh read, so a concurrent writer that already made it turns this into a
/// no-op.
async fn apply_owner_change(
    store: &dyn ObjectStore,
    mut child: ConfigSource,
    change: &OwnerChange,
    max_retries: u32,
) -> Result<bool, ReconcilerError> {
    let mut attempts = 0;
    loop {
        if !change.apply(&mut child) {
            return Ok(false);
        }
        attempts += 1;
        match store.update_child(&child).await {
            Ok(_) => return Ok(true),
            Err(StoreError::Conflict(resource)) => {
                if attempts > max_retries {
                    return Err(ReconcilerError::Conflict { resource, attempts });
                }
                debug!(
                    child = %child.id,
                    attempt = attempts,
                    "Conflict updating owner references, re-reading"
                );
                child = match store.get_child(&child.id).await {
                    Ok(fresh) => fresh,
                    // Gone: nothing left to remove, and adding is the next reconcile's job
                    Err(StoreError::NotFound(_)) if matches!(change, OwnerChange::Remove(_)) => {
                        return Ok(false);
                    }
                    Err(StoreError::NotFound(_)) => {
                        return Err(ReconcilerError::MissingChild(child.id));
                    }
                    Err(e) => return Err(e.into()),
                };
            }
            Err(StoreError::NotFound(_)) if matches!(change, OwnerChange::Remove(_)) => {
                return Ok(false);
            }
            Err(StoreError::NotFound(_)) => return Err(ReconcilerError::MissingChild(child.id)),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Bring owner references in line with the desired child set
///
/// Adds the workload's reference to every `current` child that lacks it and
/// removes it from every `existing` child no longer in `current`. Other owner
/// references are left alone and no child is ever deleted. Running it twice
/// with the same inputs performs no writes the second time.
pub async fn update_owner_references(
    store: &dyn ObjectStore,
    workload: &ManagedWorkload,
    current: &[ConfigSource],
    existing: &[ConfigSource],
    max_retries: u32,
) -> Result<OwnershipChanges, ReconcilerError> {
    let desired: BTreeSet<&ChildRef> = current.iter().map(|child| &child.id).collect();
    let owner = workload.owner_reference();
    let mut changes = OwnershipChanges::default();

    for child in current {
        if is_owned_by(child, workload) {
            continue;
        }
        let change = OwnerChange::Add(owner.clone());
        if apply_owner_change(store, child.clone(), &change, max_retries).await? {
            info!(child = %child.id, "✅ Added owner reference for {} {}", workload.kind, workload.key());
            changes.added.push(child.id.clone());
        }
    }

    // Deduplicate in case the listing returned the same child twice
    let stale: BTreeMap<&ChildRef, &ConfigSource> = existing
        .iter()
        .filter(|child| !desired.contains(&child.id))
        .map(|child| (&child.id, child))
        .collect();
    for child in stale.into_values() {
        let change = OwnerChange::Remove(workload.uid.clone());
        if apply_owner_change(store, child.clone(), &change, max_retries).await? {
            info!(child = %child.id, "🔗 Removed owner reference for {} {}", workload.kind, workload.key());
            changes.removed.push(child.id.clone());
        }
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::workload::WorkloadKind;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use std::collections::BTreeMap;

    fn workload(uid: &str) -> ManagedWorkload {
        ManagedWorkload {
            kind: WorkloadKind::Deployment,
            namespace: "default".to_string(),
            name: "web".to_string(),
            uid: uid.to_string(),
            resource_version: None,
            annotations: BTreeMap::new(),
            finalizers: Vec::new(),
            deleting: false,
            template: PodTemplateSpec::default(),
        }
    }

    fn foreign_owner() -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "web".to_string(),
            uid: "someone-else".to_string(),
            ..OwnerReference::default()
        }
    }

    #[test]
    fn test_is_owned_by_matches_on_uid_only() {
        let workload = workload("uid-1");
        let mut child = ConfigSource::new(ChildRef::config_map("default", "cm"));
        assert!(!is_owned_by(&child, &workload));

        child.owner_references.push(foreign_owner());
        assert!(!is_owned_by(&child, &workload));

        child.owner_references.push(workload.owner_reference());
        assert!(is_owned_by(&child, &workload));
    }

    #[tokio::test]
    async fn test_add_and_remove_leave_foreign_references() {
        let store = MemoryStore::new();
        let workload = workload("uid-1");
        let kept = store.insert_child(
            ConfigSource::new(ChildRef::config_map("default", "kept"))
                .with_owner(foreign_owner()),
        );
        let mut dropped = ConfigSource::new(ChildRef::secret("default", "dropped"));
        dropped.owner_references = vec![foreign_owner(), workload.owner_reference()];
        let dropped = store.insert_child(dropped);

        let changes = update_owner_references(&store, &workload, &[kept.clone()], &[dropped.clone()], 3)
            .await
            .unwrap();
        assert_eq!(changes.added, vec![kept.id.clone()]);
        assert_eq!(changes.removed, vec![dropped.id.clone()]);

        let kept = store.child(&kept.id).unwrap();
        assert_eq!(kept.owner_references.len(), 2);
        let dropped = store.child(&dropped.id).unwrap();
        assert_eq!(dropped.owner_references, vec![foreign_owner()]);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_then_surface() {
        let store = MemoryStore::new();
        let workload = workload("uid-1");
        let child = store.insert_child(ConfigSource::new(ChildRef::config_map("default", "cm")));

        store.inject_conflicts(2);
        let changes = update_owner_references(&store, &workload, &[child.clone()], &[], 2)
            .await
            .unwrap();
        assert_eq!(changes.added.len(), 1);

        let other = self::workload("uid-2");
        let refreshed = store.child(&child.id).unwrap();
        store.inject_conflicts(10);
        let err = update_owner_references(&store, &other, &[refreshed], &[], 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcilerError::Conflict { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_removal_from_vanished_child_is_a_no_op() {
        let store = MemoryStore::new();
        let workload = workload("uid-1");
        let mut gone = ConfigSource::new(ChildRef::config_map("default", "gone"));
        gone.owner_references.push(workload.owner_reference());

        let changes = update_owner_references(&store, &workload, &[], &[gone], 3)
            .await
            .unwrap();
        assert!(changes.is_empty());
    }
}
