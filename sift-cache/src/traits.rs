//! Cache store trait and the entry it stores.
//!
//! The store is an external key-value cache with tag-scoped bulk eviction.
//! The cache layer reaches it only through the three operations of
//! [`CacheStore`].

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sift_core::{QueryOutput, SiftResult};

use crate::key::{CacheKey, HashedCacheKey};
use crate::tags::CacheTags;

/// What actually lives in a cache slot: the computed value together with
/// the full key it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: CacheKey,
    pub value: QueryOutput,
}

/// Deferred computation of a missing entry. Stores poll it only on a miss.
pub type ComputeFuture<'a> = BoxFuture<'a, SiftResult<StoredEntry>>;

/// Cache store trait for pluggable cache implementations.
///
/// Implementations must be thread-safe. Each call is expected to be atomic
/// on its own; the cache layer adds no transaction around them.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Return the entry in `key`'s slot, or run `compute`, store its entry
    /// under `key` with `tags` and no expiry, and return it.
    ///
    /// Errors from `compute` must be returned unchanged and leave the slot
    /// empty.
    async fn remember_forever<'a>(
        &self,
        tags: &CacheTags,
        key: &HashedCacheKey,
        compute: ComputeFuture<'a>,
    ) -> SiftResult<StoredEntry>;

    /// Remove a single slot. Returns whether it existed.
    async fn forget(&self, tags: &CacheTags, key: &HashedCacheKey) -> SiftResult<bool>;

    /// Remove every entry carrying any of `tags`. Returns how many went.
    async fn flush(&self, tags: &CacheTags) -> SiftResult<u64>;
}
