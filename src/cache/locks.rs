//! Per-key async mutexes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::hasher::IdentityKey;

/// Lazily created mutex per identity key.
///
/// Entries idle longer than the configured time are evicted by moka. A
/// guard keeps its mutex alive through its own `Arc`, so eviction never
/// frees a held lock; the store's unique insert and version check cover
/// the window where an evicted key gets a second mutex.
pub(crate) struct KeyLocks {
    locks: moka::sync::Cache<IdentityKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            locks: moka::sync::Cache::builder().time_to_idle(idle).build(),
        }
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &IdentityKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .get_with(key.clone(), || Arc::new(Mutex::new(())));
        mutex.lock_owned().await
    }
}
