//! Per-object lock registry
//!
//! Some remote APIs are not safe for concurrent modification of the same
//! parent object (rules on one load balancer listener, for instance). Handlers
//! take a lock keyed by that parent's id; locks are created on demand and
//! dropped from the registry once nobody holds or waits for them.

use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Registry of named async locks
#[derive(Debug, Default, Clone)]
pub struct LockRegistry {
    locks: Arc<LockMap>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        trace!("waiting for lock '{}'", key);
        let guard = mutex.lock_owned().await;
        trace!("acquired lock '{}'", key);

        KeyedGuard {
            key: key.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key; released on drop
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining reference when idle.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        trace!("released lock '{}'", self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_key_is_serialized() {
        let registry = LockRegistry::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            handles.push(tokio::spawn(async move {
                let _guard = registry.lock("listener-1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let registry = LockRegistry::new();
        let _a = registry.lock("listener-a").await;

        let b = tokio::time::timeout(Duration::from_secs(1), registry.lock("listener-b")).await;
        assert!(b.is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let registry = LockRegistry::new();
        {
            let guard = registry.lock("listener-1").await;
            assert_eq!(guard.key(), "listener-1");
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_keeps_entry_alive() {
        let registry = LockRegistry::new();
        let first = registry.lock("listener-1").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = registry.lock("listener-1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(first);
        assert_eq!(registry.len(), 1);

        waiter.await.unwrap();
        assert!(registry.is_empty());
    }
}
