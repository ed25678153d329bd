//! Shared retrieval routine behind every cached read.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::FutureExt;
use sift_core::{dispatch, CacheError, Operation, Query, QueryExecutor, QueryOutput, SiftResult};

use crate::key::{CacheKey, HashedCacheKey};
use crate::model_cache::ModelCache;
use crate::stats::StatsRecorder;
use crate::tags::CacheTags;
use crate::traits::StoredEntry;

impl ModelCache {
    /// Serve `operation` on `query` from the cache, computing and storing it
    /// on a miss.
    ///
    /// Callers check cachability first. With degraded mode on, a store or
    /// cooldown-store failure falls back to running the query directly.
    pub(crate) async fn cached_value<E>(
        &self,
        executor: &E,
        query: &Query,
        operation: &Operation,
    ) -> SiftResult<QueryOutput>
    where
        E: QueryExecutor + ?Sized,
    {
        match self.retrieve_cached_value(executor, query, operation).await {
            Err(err) if err.is_backend() && self.inner.config.bypass_on_backend_error => {
                tracing::warn!(
                    table = query.table_name(),
                    operation = %operation.kind(),
                    error = %err,
                    "cache store failed, querying without cache"
                );
                StatsRecorder::bump(&self.inner.stats.bypasses);
                Ok(dispatch(executor, query, operation).await?)
            }
            result => result,
        }
    }

    async fn retrieve_cached_value<E>(
        &self,
        executor: &E,
        query: &Query,
        operation: &Operation,
    ) -> SiftResult<QueryOutput>
    where
        E: QueryExecutor + ?Sized,
    {
        // Tags double as cooldown entities: every table the result depends
        // on gets its expired window closed before the lookup.
        let tags = self.cache_tags(query);
        for entity in tags.iter() {
            if self
                .inner
                .gate
                .remove_if_expired(entity, self.inner.store.as_ref())
                .await?
            {
                StatsRecorder::bump(&self.inner.stats.flushes);
            }
        }

        let key = self.cache_key(query, operation).await?;
        let slot = self.inner.digest.digest(&key);

        let _guard = self.inner.locks.lock(&slot).await;
        let entry = self
            .remember(executor, query, operation, &tags, &slot, &key)
            .await?;
        let entry = self
            .prevent_hash_collision(executor, query, operation, &tags, &slot, &key, entry)
            .await?;
        Ok(entry.value)
    }

    async fn remember<E>(
        &self,
        executor: &E,
        query: &Query,
        operation: &Operation,
        tags: &CacheTags,
        slot: &HashedCacheKey,
        key: &CacheKey,
    ) -> SiftResult<StoredEntry>
    where
        E: QueryExecutor + ?Sized,
    {
        let computed = AtomicBool::new(false);
        let entry = self
            .inner
            .store
            .remember_forever(
                tags,
                slot,
                compute_entry(executor, query, operation, key, &computed).boxed(),
            )
            .await?;

        if computed.load(Ordering::Acquire) {
            StatsRecorder::bump(&self.inner.stats.misses);
            tracing::debug!(key = %key, "cache miss");
        } else {
            StatsRecorder::bump(&self.inner.stats.hits);
            tracing::debug!(key = %key, "cache hit");
        }
        Ok(entry)
    }

    /// A slot holding an entry for a different key means two keys share a
    /// digest. Evict the slot and recompute once; a second mismatch is fatal.
    #[allow(clippy::too_many_arguments)]
    async fn prevent_hash_collision<E>(
        &self,
        executor: &E,
        query: &Query,
        operation: &Operation,
        tags: &CacheTags,
        slot: &HashedCacheKey,
        key: &CacheKey,
        entry: StoredEntry,
    ) -> SiftResult<StoredEntry>
    where
        E: QueryExecutor + ?Sized,
    {
        if entry.key == *key {
            return Ok(entry);
        }

        StatsRecorder::bump(&self.inner.stats.collisions);
        tracing::warn!(
            slot = %slot,
            key = %key,
            found = %entry.key,
            "cache key collision, evicting slot"
        );
        self.inner.store.forget(tags, slot).await?;

        let retried = self
            .remember(executor, query, operation, tags, slot, key)
            .await?;
        if retried.key == *key {
            return Ok(retried);
        }
        Err(CacheError::CollisionRepairFailed {
            key: key.to_string(),
            found: retried.key.into_string(),
        }
        .into())
    }
}

async fn compute_entry<E>(
    executor: &E,
    query: &Query,
    operation: &Operation,
    key: &CacheKey,
    computed: &AtomicBool,
) -> SiftResult<StoredEntry>
where
    E: QueryExecutor + ?Sized,
{
    computed.store(true, Ordering::Release);
    let value = dispatch(executor, query, operation).await?;
    Ok(StoredEntry {
        key: key.clone(),
        value,
    })
}
