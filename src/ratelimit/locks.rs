//! Per-key mutual exclusion for window updates.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A table of async locks, one per store key.
///
/// Holding a key's guard across the read and write of its window turns the
/// update into an atomic increment-and-compare for every limiter sharing
/// this table. An entry lives only while some check holds or waits on it.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive access to one key; releases and prunes the entry on drop.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    table: Arc<KeyLocks>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(self: &Arc<Self>, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            key: key.to_string(),
            table: self.clone(),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference is gone.
        drop(self.guard.take());

        // Waiters hold a clone of the mutex, so the count is 1 only when
        // nobody else needs the entry. The shard lock keeps new arrivals out
        // while we decide.
        self.table
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let _guard = locks.lock("sess1").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("sess1")).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = Arc::new(KeyLocks::new());
        let _a = locks.lock("a").await;

        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_released_guard_can_be_reacquired() {
        let locks = Arc::new(KeyLocks::new());
        drop(locks.lock("sess1").await);

        let again = tokio::time::timeout(Duration::from_millis(50), locks.lock("sess1")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_entries_pruned_when_released() {
        let locks = Arc::new(KeyLocks::new());

        for i in 0..100 {
            let _guard = locks.lock(&format!("sess{i}")).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_pending() {
        let locks = Arc::new(KeyLocks::new());
        let first = locks.lock("sess1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("sess1").await;
            })
        };
        // Let the waiter register on the mutex.
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
