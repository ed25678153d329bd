//! In-memory cache store.
//!
//! Entries are kept JSON-serialized, the way an external store would hold
//! them, so serialization failures surface here as they would against a
//! real backend. A tag index maps each tag to the slots carrying it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use sift_core::{BackendError, SiftResult};

use crate::key::HashedCacheKey;
use crate::tags::CacheTags;
use crate::traits::{CacheStore, ComputeFuture, StoredEntry};

#[derive(Debug)]
struct Slot {
    payload: Vec<u8>,
    tags: CacheTags,
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<HashedCacheKey, Slot>,
    by_tag: HashMap<String, HashSet<HashedCacheKey>>,
}

impl Inner {
    fn remove(&mut self, key: &HashedCacheKey) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        for tag in slot.tags.iter() {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
        true
    }
}

/// Process-local [`CacheStore`] backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read a slot without computing anything.
    pub fn peek(&self, key: &HashedCacheKey) -> SiftResult<Option<StoredEntry>> {
        let inner = self.inner.read().map_err(|_| BackendError::LockPoisoned)?;
        inner.slots.get(key).map(|s| decode(&s.payload)).transpose()
    }

    /// Store an entry directly, replacing whatever the slot held.
    pub fn put(&self, tags: &CacheTags, key: &HashedCacheKey, entry: &StoredEntry) -> SiftResult<()> {
        let payload = encode(entry)?;
        let mut inner = self.inner.write().map_err(|_| BackendError::LockPoisoned)?;
        inner.remove(key);
        insert_slot(&mut inner, tags, key, payload);
        Ok(())
    }

    /// `(hits, misses)` seen by `remember_forever`.
    pub fn hit_miss(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

fn encode(entry: &StoredEntry) -> SiftResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| {
        BackendError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode(payload: &[u8]) -> SiftResult<StoredEntry> {
    serde_json::from_slice(payload).map_err(|e| {
        BackendError::Deserialization {
            reason: e.to_string(),
        }
        .into()
    })
}

fn insert_slot(inner: &mut Inner, tags: &CacheTags, key: &HashedCacheKey, payload: Vec<u8>) {
    for tag in tags.iter() {
        inner
            .by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(key.clone());
    }
    inner.slots.insert(
        key.clone(),
        Slot {
            payload,
            tags: tags.clone(),
        },
    );
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn remember_forever<'a>(
        &self,
        tags: &CacheTags,
        key: &HashedCacheKey,
        compute: ComputeFuture<'a>,
    ) -> SiftResult<StoredEntry> {
        if let Some(entry) = self.peek(key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let entry = compute.await?;
        let payload = encode(&entry)?;

        let mut inner = self.inner.write().map_err(|_| BackendError::LockPoisoned)?;
        // A concurrent caller may have filled the slot while we computed;
        // keep the first value so every caller sees the same result.
        if let Some(existing) = inner.slots.get(key) {
            return decode(&existing.payload);
        }
        insert_slot(&mut inner, tags, key, payload);
        Ok(entry)
    }

    async fn forget(&self, _tags: &CacheTags, key: &HashedCacheKey) -> SiftResult<bool> {
        let mut inner = self.inner.write().map_err(|_| BackendError::LockPoisoned)?;
        Ok(inner.remove(key))
    }

    async fn flush(&self, tags: &CacheTags) -> SiftResult<u64> {
        let mut inner = self.inner.write().map_err(|_| BackendError::LockPoisoned)?;
        let doomed: HashSet<HashedCacheKey> = tags
            .iter()
            .filter_map(|tag| inner.by_tag.get(tag))
            .flat_map(|keys| keys.iter().cloned())
            .collect();

        let mut removed = 0;
        for key in &doomed {
            if inner.remove(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::hashed_key_from;
    use futures_util::FutureExt;
    use sift_core::{ExecutorError, QueryOutput, SiftError};

    fn entry(key: &str, n: u64) -> StoredEntry {
        StoredEntry {
            key: key.into(),
            value: QueryOutput::Count(n),
        }
    }

    fn tags(names: &[&str]) -> CacheTags {
        names.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_remember_forever_computes_once() {
        let store = InMemoryCacheStore::new();
        let slot = hashed_key_from("k1");
        let t = tags(&["users"]);

        let first = store
            .remember_forever(&t, &slot, async { Ok::<_, SiftError>(entry("users-count", 3)) }.boxed())
            .await
            .unwrap();
        let second = store
            .remember_forever(&t, &slot, async { Ok::<_, SiftError>(entry("users-count", 99)) }.boxed())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(second.value, QueryOutput::Count(3));
        assert_eq!(store.hit_miss(), (1, 1));
    }

    #[tokio::test]
    async fn test_compute_error_leaves_slot_empty() {
        let store = InMemoryCacheStore::new();
        let slot = hashed_key_from("k1");
        let err = SiftError::Executor(ExecutorError::ConnectionFailed {
            reason: "down".to_string(),
        });
        let failing = err.clone();

        let result = store
            .remember_forever(&tags(&["users"]), &slot, async move { Err::<StoredEntry, _>(failing) }.boxed())
            .await;

        assert_eq!(result.unwrap_err(), err);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_flush_removes_only_tagged_entries() {
        let store = InMemoryCacheStore::new();
        store
            .put(&tags(&["users"]), &hashed_key_from("a"), &entry("a", 1))
            .unwrap();
        store
            .put(&tags(&["users", "posts"]), &hashed_key_from("b"), &entry("b", 2))
            .unwrap();
        store
            .put(&tags(&["comments"]), &hashed_key_from("c"), &entry("c", 3))
            .unwrap();

        let removed = store.flush(&tags(&["posts"])).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.peek(&hashed_key_from("a")).unwrap().is_some());
        assert!(store.peek(&hashed_key_from("b")).unwrap().is_none());

        let removed = store.flush(&tags(&["users", "comments"])).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_forget_single_slot() {
        let store = InMemoryCacheStore::new();
        let slot = hashed_key_from("a");
        store.put(&tags(&["users"]), &slot, &entry("a", 1)).unwrap();

        assert!(store.forget(&tags(&["users"]), &slot).await.unwrap());
        assert!(!store.forget(&tags(&["users"]), &slot).await.unwrap());
        // The tag index no longer references the slot.
        assert_eq!(store.flush(&tags(&["users"])).await.unwrap(), 0);
    }
}
