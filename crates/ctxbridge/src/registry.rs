//! Reference-counted handle table.
//!
//! Engine callbacks only carry a [`ReferenceId`]. The registry maps that id
//! back to the live host object while at least one engine call is in flight
//! on its behalf. Entries hold a [`Weak`] reference so the table never keeps
//! an object alive on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tracing::trace;

use crate::abi::ReferenceId;

/// Registered target plus the number of in-flight calls for it.
struct RegistryEntry<T> {
    /// Non-owning reference to the target
    target: Weak<T>,
    /// Number of outstanding registrations
    ref_count: usize,
}

/// Concurrency-safe table from [`ReferenceId`] to registered objects.
pub struct HandleRegistry<T> {
    /// Live entries, present only while `ref_count > 0`
    entries: RwLock<HashMap<ReferenceId, RegistryEntry<T>>>,
    /// Last id handed out by [`Self::next_reference`]
    sequence: AtomicU64,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry whose first id will be 1.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh id. Ids are never reused by this registry.
    pub fn next_reference(&self) -> ReferenceId {
        ReferenceId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Make `target` resolvable under `reference`, or bump its count if it
    /// already is.
    pub fn register(&self, reference: ReferenceId, target: &Arc<T>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(reference).or_insert_with(|| RegistryEntry {
            target: Arc::downgrade(target),
            ref_count: 0,
        });
        entry.ref_count += 1;
        trace!(%reference, ref_count = entry.ref_count, "registered");
    }

    /// Drop one registration; the entry disappears once none are left.
    /// Unknown ids are ignored.
    pub fn deregister(&self, reference: ReferenceId) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&reference) else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        trace!(%reference, ref_count = entry.ref_count, "deregistered");
        if entry.ref_count == 0 {
            entries.remove(&reference);
        }
    }

    /// Register now and deregister when the returned guard drops.
    #[must_use = "the registration ends when the guard is dropped"]
    pub fn guard(&self, reference: ReferenceId, target: &Arc<T>) -> RegistrationGuard<'_, T> {
        self.register(reference, target);
        RegistrationGuard {
            registry: self,
            reference,
        }
    }

    /// Resolve `reference` to its target.
    ///
    /// Returns `None` if the id is not registered or its target is gone.
    pub fn lookup(&self, reference: ReferenceId) -> Option<Arc<T>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&reference)?.target.upgrade()
    }

    /// Outstanding registrations for `reference`, zero when absent.
    pub fn ref_count(&self, reference: ReferenceId) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&reference).map_or(0, |entry| entry.ref_count)
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no id is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped registration created by [`HandleRegistry::guard`].
pub struct RegistrationGuard<'registry, T> {
    /// Registry to deregister from
    registry: &'registry HandleRegistry<T>,
    /// Registered id
    reference: ReferenceId,
}

impl<T> Drop for RegistrationGuard<'_, T> {
    fn drop(&mut self) {
        self.registry.deregister(self.reference);
    }
}
