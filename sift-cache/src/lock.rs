//! Key-scoped mutual exclusion around fetch-or-compute.
//!
//! Concurrent misses on the same slot must run the query once. Each slot
//! gets its own async mutex for as long as someone holds or waits on it;
//! the map entry is dropped when the last guard goes away.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::key::HashedCacheKey;

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<HashedCacheKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`'s slot.
    pub async fn lock(&self, key: &HashedCacheKey) -> KeyGuard<'_> {
        let mutex = Arc::clone(
            self.locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Number of slots currently locked or awaited.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Held while computing a slot. Releases and cleans up on drop.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: HashedCacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody is waiting.
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::hashed_key_from;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = KeyLocks::new();
        let key = hashed_key_from("a");
        {
            let _guard = locks.lock(&key).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&hashed_key_from("same")).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }
}
