//! # Cluster State Document Model
//!
//! The shared, versioned document describing every managed index, together
//! with the optimistic store contract the driver commits through. The store
//! is an external collaborator in production; the in-memory implementation
//! here backs tests and single-process embedding.
//!
//! Steps receive a [`ClusterState`] as a consistent snapshot for the duration
//! of one invocation and return a candidate replacement. They never write
//! through to the store; the driver owns the read-propose cycle and the
//! conflict handling around it.

use crate::execution_state::{LifecycleExecutionState, CUSTOM_METADATA_KEY};
use std::collections::HashMap;
use std::sync::Arc;

/// Monotonic document version used for conditional updates.
pub type Version = u64;

/// Per-index metadata as carried in the cluster document.
///
/// The lifecycle engine only reads the policy binding and its own custom
/// metadata entry; everything else the document may carry is outside this
/// crate's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    name: String,
    policy: Option<String>,
    custom: HashMap<String, HashMap<String, String>>,
}

impl IndexMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: None,
            custom: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lifecycle policy this index is bound to, if any.
    pub fn policy(&self) -> Option<&str> {
        self.policy.as_deref()
    }

    pub fn custom_metadata(&self, key: &str) -> Option<&HashMap<String, String>> {
        self.custom.get(key)
    }

    /// The lifecycle execution state persisted on this index. An absent
    /// entry decodes to the empty (freshly-managed) record.
    pub fn lifecycle_execution_state(
        &self,
    ) -> crate::error::Result<LifecycleExecutionState> {
        match self.custom.get(CUSTOM_METADATA_KEY) {
            Some(map) => LifecycleExecutionState::from_map(&self.name, map),
            None => Ok(LifecycleExecutionState::default()),
        }
    }

    /// Copy-on-write replacement of the lifecycle execution state.
    pub fn with_execution_state(&self, state: &LifecycleExecutionState) -> Self {
        let mut updated = self.clone();
        updated
            .custom
            .insert(CUSTOM_METADATA_KEY.to_string(), state.to_map());
        updated
    }

    /// Detach the index from lifecycle management, removing the persisted
    /// execution record.
    pub fn without_lifecycle(&self) -> Self {
        let mut updated = self.clone();
        updated.policy = None;
        updated.custom.remove(CUSTOM_METADATA_KEY);
        updated
    }
}

/// The whole-cluster document. Index entries are shared via `Arc` so that
/// replacing one index's metadata leaves every other entry referentially
/// unchanged in the candidate document.
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    indices: HashMap<String, Arc<IndexMetadata>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, name: &str) -> Option<&Arc<IndexMetadata>> {
        self.indices.get(name)
    }

    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// Indices currently bound to a lifecycle policy.
    pub fn managed_indices(&self) -> Vec<(String, String)> {
        let mut managed: Vec<(String, String)> = self
            .indices
            .values()
            .filter_map(|meta| {
                meta.policy()
                    .map(|policy| (meta.name().to_string(), policy.to_string()))
            })
            .collect();
        managed.sort();
        managed
    }

    /// Candidate state with one index's metadata replaced (or inserted).
    pub fn with_index(&self, metadata: IndexMetadata) -> Self {
        let mut updated = self.clone();
        updated
            .indices
            .insert(metadata.name().to_string(), Arc::new(metadata));
        updated
    }

    /// Candidate state with an index removed entirely.
    pub fn without_index(&self, name: &str) -> Self {
        let mut updated = self.clone();
        updated.indices.remove(name);
        updated
    }
}

/// Outcome of a conditional update proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The candidate was accepted and is now the current document.
    Committed(Version),
    /// The document changed since the read; the candidate was discarded.
    Conflict { current: Version },
}

/// Contract of the shared, versioned document store.
///
/// `propose_update` has compare-and-swap semantics over the whole document:
/// it either replaces the document atomically or rejects the candidate
/// without partial effect. This is the engine's only serialization point.
pub trait ClusterStateStore: Send + Sync {
    fn read(&self) -> (ClusterState, Version);
    fn propose_update(&self, read_version: Version, candidate: ClusterState) -> Commit;
}

/// Lock-based in-memory store with optimistic version checking.
#[derive(Default)]
pub struct InMemoryClusterStateStore {
    inner: parking_lot::RwLock<(ClusterState, Version)>,
}

impl InMemoryClusterStateStore {
    pub fn new(initial: ClusterState) -> Self {
        Self {
            inner: parking_lot::RwLock::new((initial, 0)),
        }
    }

    /// Unconditional replacement, for test setup and out-of-band mutation.
    /// Bumps the version so in-flight proposals observe a conflict.
    pub fn overwrite(&self, state: ClusterState) -> Version {
        let mut guard = self.inner.write();
        guard.0 = state;
        guard.1 += 1;
        guard.1
    }
}

impl ClusterStateStore for InMemoryClusterStateStore {
    fn read(&self) -> (ClusterState, Version) {
        let guard = self.inner.read();
        (guard.0.clone(), guard.1)
    }

    fn propose_update(&self, read_version: Version, candidate: ClusterState) -> Commit {
        let mut guard = self.inner.write();
        if guard.1 != read_version {
            return Commit::Conflict { current: guard.1 };
        }
        guard.0 = candidate;
        guard.1 += 1;
        Commit::Committed(guard.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(indices: &[(&str, Option<&str>)]) -> ClusterState {
        let mut state = ClusterState::new();
        for (name, policy) in indices {
            let mut meta = IndexMetadata::new(*name);
            if let Some(p) = policy {
                meta = meta.with_policy(*p);
            }
            state = state.with_index(meta);
        }
        state
    }

    #[test]
    fn managed_indices_filters_unbound() {
        let state = state_with(&[("idx1", Some("p1")), ("idx2", None), ("idx3", Some("p2"))]);
        let managed = state.managed_indices();
        assert_eq!(
            managed,
            vec![
                ("idx1".to_string(), "p1".to_string()),
                ("idx3".to_string(), "p2".to_string())
            ]
        );
    }

    #[test]
    fn with_index_leaves_other_entries_referentially_unchanged() {
        let state = state_with(&[("idx1", Some("p1")), ("idx2", Some("p1"))]);
        let untouched_before = Arc::clone(state.index("idx2").unwrap());

        let replacement = IndexMetadata::new("idx1").with_policy("p2");
        let updated = state.with_index(replacement);

        assert!(Arc::ptr_eq(&untouched_before, updated.index("idx2").unwrap()));
        assert_eq!(updated.index("idx1").unwrap().policy(), Some("p2"));
        // original snapshot is unaffected
        assert_eq!(state.index("idx1").unwrap().policy(), Some("p1"));
    }

    #[test]
    fn store_accepts_update_at_read_version() {
        let store = InMemoryClusterStateStore::new(state_with(&[("idx1", Some("p1"))]));
        let (state, version) = store.read();
        let candidate = state.without_index("idx1");
        assert_eq!(
            store.propose_update(version, candidate),
            Commit::Committed(version + 1)
        );
        let (after, _) = store.read();
        assert!(after.index("idx1").is_none());
    }

    #[test]
    fn store_rejects_stale_proposal_atomically() {
        let store = InMemoryClusterStateStore::new(state_with(&[("idx1", Some("p1"))]));
        let (state, version) = store.read();

        // Another actor commits first.
        let other = state.with_index(IndexMetadata::new("idx2"));
        store.propose_update(version, other);

        let stale = state.without_index("idx1");
        assert!(matches!(
            store.propose_update(version, stale),
            Commit::Conflict { .. }
        ));
        // The rejected candidate had no effect.
        let (after, _) = store.read();
        assert!(after.index("idx1").is_some());
        assert!(after.index("idx2").is_some());
    }
}
