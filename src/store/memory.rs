//! # Memory Store
//!
//! `ObjectStore` kept entirely in memory, with the same resource-version
//! semantics as the API server. Used by the test suites to drive the engine
//! without a cluster and to count the writes it performs.

use super::{ChildRef, ConfigSource, ObjectStore, StoreError};
use crate::workload::{ManagedWorkload, WorkloadKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type WorkloadKey = (WorkloadKind, String, String);

#[derive(Debug, Default)]
struct MemoryState {
    children: BTreeMap<ChildRef, ConfigSource>,
    workloads: BTreeMap<WorkloadKey, ManagedWorkload>,
    last_version: u64,
    pending_conflicts: u32,
    pending_workload_conflicts: u32,
    child_lists: usize,
    child_updates: usize,
    workload_updates: usize,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    /// Stored copy of `workload`, provided `workload` is not stale
    fn stored_workload(
        &mut self,
        workload: &ManagedWorkload,
    ) -> Result<&mut ManagedWorkload, StoreError> {
        let what = format!("{} {}", workload.kind, workload.key());
        if self.pending_workload_conflicts > 0 {
            self.pending_workload_conflicts -= 1;
            let version = self.next_version();
            if let Some(stored) = self.workloads.get_mut(&workload_key(workload)) {
                stored.resource_version = Some(version);
            }
            return Err(StoreError::Conflict(what));
        }
        let stored = self
            .workloads
            .get_mut(&workload_key(workload))
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        if workload.resource_version.is_some()
            && stored.resource_version != workload.resource_version
        {
            return Err(StoreError::Conflict(what));
        }
        Ok(stored)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn workload_key(workload: &ManagedWorkload) -> WorkloadKey {
    (
        workload.kind,
        workload.namespace.clone(),
        workload.name.clone(),
    )
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a child, assigning a fresh resource version
    pub fn insert_child(&self, mut child: ConfigSource) -> ConfigSource {
        let mut state = self.lock();
        child.resource_version = Some(state.next_version());
        state.children.insert(child.id.clone(), child.clone());
        child
    }

    /// Modify a child as a concurrent writer would, bumping its resource version
    pub fn modify_child(
        &self,
        id: &ChildRef,
        change: impl FnOnce(&mut ConfigSource),
    ) -> Option<ConfigSource> {
        let mut state = self.lock();
        let version = state.next_version();
        let child = state.children.get_mut(id)?;
        change(child);
        child.resource_version = Some(version);
        Some(child.clone())
    }

    pub fn remove_child(&self, id: &ChildRef) -> Option<ConfigSource> {
        self.lock().children.remove(id)
    }

    #[must_use]
    pub fn child(&self, id: &ChildRef) -> Option<ConfigSource> {
        self.lock().children.get(id).cloned()
    }

    /// Create or replace a workload, assigning a fresh resource version
    pub fn insert_workload(&self, mut workload: ManagedWorkload) -> ManagedWorkload {
        let mut state = self.lock();
        workload.resource_version = Some(state.next_version());
        state
            .workloads
            .insert(workload_key(&workload), workload.clone());
        workload
    }

    /// Current stored copy of `workload`
    #[must_use]
    pub fn workload(&self, workload: &ManagedWorkload) -> Option<ManagedWorkload> {
        self.lock().workloads.get(&workload_key(workload)).cloned()
    }

    /// Make the next `count` child updates fail as if another writer got there first
    pub fn inject_conflicts(&self, count: u32) {
        self.lock().pending_conflicts = count;
    }

    /// Make the next `count` workload writes fail as if another writer got there first
    pub fn inject_workload_conflicts(&self, count: u32) {
        self.lock().pending_workload_conflicts = count;
    }

    /// Number of namespace listings of children so far
    #[must_use]
    pub fn child_lists(&self) -> usize {
        self.lock().child_lists
    }

    /// Number of successful child writes so far
    #[must_use]
    pub fn child_updates(&self) -> usize {
        self.lock().child_updates
    }

    /// Number of successful workload writes so far
    #[must_use]
    pub fn workload_updates(&self) -> usize {
        self.lock().workload_updates
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_child(&self, id: &ChildRef) -> Result<ConfigSource, StoreError> {
        self.child(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_children(&self, namespace: &str) -> Result<Vec<ConfigSource>, StoreError> {
        let mut state = self.lock();
        state.child_lists += 1;
        Ok(state
            .children
            .values()
            .filter(|child| child.id.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn update_child(&self, child: &ConfigSource) -> Result<ConfigSource, StoreError> {
        let mut state = self.lock();
        let version = state.next_version();

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            if let Some(stored) = state.children.get_mut(&child.id) {
                stored.resource_version = Some(version);
            }
            return Err(StoreError::Conflict(child.id.to_string()));
        }

        let stored = state
            .children
            .get_mut(&child.id)
            .ok_or_else(|| StoreError::NotFound(child.id.to_string()))?;
        if child.resource_version.is_some() && stored.resource_version != child.resource_version {
            return Err(StoreError::Conflict(child.id.to_string()));
        }

        stored.owner_references = child.owner_references.clone();
        stored.resource_version = Some(version);
        let updated = stored.clone();
        state.child_updates += 1;
        Ok(updated)
    }

    async fn get_workload(&self, workload: &ManagedWorkload) -> Result<ManagedWorkload, StoreError> {
        self.workload(workload)
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", workload.kind, workload.key())))
    }

    async fn set_template_annotation(
        &self,
        workload: &ManagedWorkload,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let version = state.next_version();
        let stored = state.stored_workload(workload)?;
        stored
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        stored.resource_version = Some(version);
        state.workload_updates += 1;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        workload: &ManagedWorkload,
        finalizers: &[String],
    ) -> Result<ManagedWorkload, StoreError> {
        let mut state = self.lock();
        let version = state.next_version();
        let stored = state.stored_workload(workload)?;

        stored.finalizers = finalizers.to_vec();
        stored.resource_version = Some(version);
        let updated = stored.clone();
        state.workload_updates += 1;
        Ok(updated)
    }
}
