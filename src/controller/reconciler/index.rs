//! # Owner Index
//!
//! In-memory map from a ConfigMap/Secret to the workloads of one kind that
//! own it, rebuilt from the watch stream and never persisted.
//!
//! When a child changes, the workloads it belongs to must reconcile. That
//! includes workloads that just lost ownership in the same event, so
//! [`OwnerIndex::observe`] returns the union of the previous and the new
//! owners. Deleted children reach the index with no owners and are dropped.

use crate::constants::WORKLOAD_API_VERSION;
use crate::store::{ChildRef, ConfigSource};
use crate::workload::WorkloadKind;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone)]
pub struct OwnerIndex {
    kind: WorkloadKind,
    inner: Arc<RwLock<HashMap<ChildRef, BTreeSet<String>>>>,
}

impl OwnerIndex {
    #[must_use]
    pub fn new(kind: WorkloadKind) -> Self {
        Self {
            kind,
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn owners_in(&self, child: &ConfigSource) -> BTreeSet<String> {
        child
            .owner_references
            .iter()
            .filter(|owner| owner.kind == self.kind.as_str() && owner.api_version == WORKLOAD_API_VERSION)
            .map(|owner| owner.name.clone())
            .collect()
    }

    /// Record the current owners of `child` and return every workload name
    /// (of this index's kind) that owned it before or owns it now
    pub fn observe(&self, child: &ConfigSource) -> BTreeSet<String> {
        let current = self.owners_in(child);
        let mut index = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = if current.is_empty() {
            index.remove(&child.id)
        } else {
            index.insert(child.id.clone(), current.clone())
        };
        previous.unwrap_or_default().union(&current).cloned().collect()
    }

    /// Workload names currently recorded as owners of `id`
    #[must_use]
    pub fn owners_of(&self, id: &ChildRef) -> BTreeSet<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
