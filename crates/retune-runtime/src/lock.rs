//! Per-container update locks.
//!
//! Locks are created on first use and handed out as owned guards, so a guard
//! can be held across `.await` points for the whole apply and commit window.
//! Waiters are served in FIFO order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use retune_common::types::ContainerId;
use tokio::sync::OwnedMutexGuard;

type UpdateLock = Arc<tokio::sync::Mutex<()>>;

/// Lazily populated table of per-container locks.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<ContainerId, UpdateLock>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `id`.
    pub async fn acquire(&self, id: &ContainerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock for `id` if no guard or waiter still references it.
    /// Returns `true` if the entry was removed.
    pub fn reclaim(&self, id: &ContainerId) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            let _ = locks.remove(id);
        }
        idle
    }

    /// Number of containers with a live lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no lock entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_container_is_exclusive() {
        let registry = LockRegistry::new();
        let id = ContainerId::new("c1");
        let guard = registry.acquire(&id).await;
        let second = tokio::time::timeout(Duration::from_millis(50), registry.acquire(&id)).await;
        assert!(second.is_err());
        drop(guard);
        let _again = registry.acquire(&id).await;
    }

    #[tokio::test]
    async fn different_containers_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.acquire(&ContainerId::new("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), registry.acquire(&ContainerId::new("b"))).await;
        assert!(b.is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn reclaim_skips_held_locks() {
        let registry = LockRegistry::new();
        let id = ContainerId::new("c1");
        let guard = registry.acquire(&id).await;
        assert!(!registry.reclaim(&id));
        drop(guard);
        assert!(registry.reclaim(&id));
        assert!(registry.is_empty());
        assert!(!registry.reclaim(&id));
    }
}
