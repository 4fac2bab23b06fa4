//! Per-replica-set locks.
//!
//! Every mutating orchestration call holds the lock of the replica set it
//! works on for its whole duration, so an upgrade cannot interleave with a
//! removal of the same replica set inside one process. Callers in other
//! processes still need external serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Held for the duration of one orchestration call.
pub type ReplicaSetGuard = OwnedMutexGuard<()>;

#[derive(Debug, Clone, Default)]
pub struct ReplicaSetLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ReplicaSetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries nobody holds or waits for are dropped on the way.
    fn entry(&self, region: &str, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(format!("{region}/{name}")).or_default().clone()
    }

    /// Wait until no other call works on `region/name`.
    pub async fn lock(&self, region: &str, name: &str) -> ReplicaSetGuard {
        let lock = self.entry(region, name);
        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        debug!(region, replica_set = name, "waiting for replica set lock");
        lock.lock_owned().await
    }
}
