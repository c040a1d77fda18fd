use crate::storage::traits::{RunStore, StorageError, StorageResult};
use std::sync::{Arc, Mutex};

/// Shared, thread-safe access to the run store
///
/// The store is the only shared mutable resource; every component holds a
/// clone of this handle and derives its view of runs from store queries.
/// Calls are short and synchronous, so the lock is never held across an
/// `.await`.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<Box<dyn RunStore>>>,
}

impl StoreHandle {
    pub fn new(store: impl RunStore + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Runs `f` with exclusive access to the store
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut dyn RunStore) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut **guard)
    }
}
