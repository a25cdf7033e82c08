//! Instance registry.
//!
//! Lifecycle actions carry only an [`InstanceId`]. The registry maps that id
//! back to the [`Lifecycle`] bundle (and through it, the operation) so the
//! epic can invoke the right operation and build follow-up actions.
//!
//! The registry is an injectable service rather than global state: create one
//! per store (or per test) and hand clones to the lifecycle factory, the slice
//! reducer environment and the epic. Clones share the same map.

use crate::id::InstanceId;
use crate::lifecycle::Lifecycle;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared map from instance id to lifecycle bundle.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<InstanceId, Lifecycle>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lifecycle under its id.
    ///
    /// Must be called once per id. Registering an id twice is a programming
    /// error; release builds overwrite the previous entry.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `id` is already registered.
    pub fn register(&self, lifecycle: Lifecycle) {
        let id = lifecycle.id().clone();
        let previous = self.write().insert(id.clone(), lifecycle);
        debug_assert!(previous.is_none(), "instance {id} registered twice");
        tracing::trace!(%id, "Registered lifecycle");
    }

    /// Look up the lifecycle registered under `id`.
    #[must_use]
    pub fn lookup(&self, id: &InstanceId) -> Option<Lifecycle> {
        self.read().get(id).cloned()
    }

    /// Remove `id`. Removing an unknown id is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, id: &InstanceId) -> bool {
        let removed = self.write().remove(id).is_some();
        if removed {
            tracing::trace!(%id, "Unregistered lifecycle");
        }
        removed
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.read().contains_key(id)
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids of every registered instance.
    #[must_use]
    pub fn ids(&self) -> Vec<InstanceId> {
        self.read().keys().cloned().collect()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    // The map is never left half-updated, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<InstanceId, Lifecycle>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<InstanceId, Lifecycle>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{FnOperation, OperationOutput};
    use serde_json::json;

    fn lifecycle(registry: &Registry) -> Lifecycle {
        Lifecycle::new(
            registry,
            FnOperation::named("noop", |_| Ok(OperationOutput::ready(json!(null)))),
        )
    }

    #[test]
    fn lifecycle_construction_registers() {
        let registry = Registry::new();
        let lifecycle = lifecycle(&registry);

        let found = registry.lookup(lifecycle.id());
        assert_eq!(found.map(|l| l.id().clone()), Some(lifecycle.id().clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered twice")]
    fn reusing_an_id_asserts_in_debug_builds() {
        let registry = Registry::new();
        let first = lifecycle(&registry);
        let _second = Lifecycle::with_id(&registry, first.id().clone(), Arc::clone(first.operation()));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::new();
        let lifecycle = lifecycle(&registry);

        assert!(registry.unregister(lifecycle.id()));
        assert!(!registry.unregister(lifecycle.id()));
        assert!(registry.lookup(lifecycle.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_entries() {
        let registry = Registry::new();
        let other = registry.clone();
        let lifecycle = lifecycle(&registry);

        assert!(other.contains(lifecycle.id()));
        other.clear();
        assert!(!registry.contains(lifecycle.id()));
    }

    #[test]
    fn registries_are_isolated() {
        let a = Registry::new();
        let b = Registry::new();
        let lifecycle = lifecycle(&a);

        assert!(a.contains(lifecycle.id()));
        assert!(!b.contains(lifecycle.id()));
    }
}
