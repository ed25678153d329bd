//! Invalidation bookkeeping run before every write.

use std::time::Duration;

use sift_core::{Query, SiftResult};

use crate::cooldown::FlushDecision;
use crate::model_cache::ModelCache;
use crate::stats::StatsRecorder;

impl ModelCache {
    /// Insert/update bookkeeping: flush the query's tags now, or defer to
    /// the end of the table's cooldown window.
    ///
    /// `cooldown` overrides the configured window for this write.
    pub(crate) async fn invalidate_after_persisting(
        &self,
        query: &Query,
        cooldown: Option<Duration>,
    ) -> SiftResult<FlushDecision> {
        let table = query.table_name();
        let window = cooldown.or_else(|| self.inner.config.cooldown_for(table));
        let tags = self.cache_tags(query);

        let decision = self
            .inner
            .gate
            .flush_after_persisting(&self.entity(table), window, &tags, self.inner.store.as_ref())
            .await?;

        match decision {
            FlushDecision::Flushed => StatsRecorder::bump(&self.inner.stats.flushes),
            FlushDecision::Deferred => StatsRecorder::bump(&self.inner.stats.deferred_flushes),
        }
        tracing::debug!(table, ?decision, "invalidated after write");
        Ok(decision)
    }

    /// Delete bookkeeping: always flush immediately.
    pub(crate) async fn flush_now(&self, query: &Query) -> SiftResult<u64> {
        let removed = self.inner.store.flush(&self.cache_tags(query)).await?;
        StatsRecorder::bump(&self.inner.stats.flushes);
        tracing::debug!(table = query.table_name(), removed, "flushed before delete");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCacheStore;
    use crate::tags::CacheTags;
    use crate::key::hashed_key_from;
    use crate::traits::{CacheStore, StoredEntry};
    use sift_core::{CacheConfig, QueryOutput, Relation};
    use std::sync::Arc;

    fn seeded(tag: &str) -> Arc<InMemoryCacheStore> {
        let store = Arc::new(InMemoryCacheStore::new());
        let tags: CacheTags = [tag].into_iter().collect();
        let entry = StoredEntry {
            key: "seed".into(),
            value: QueryOutput::Count(1),
        };
        store.put(&tags, &hashed_key_from("seed"), &entry).unwrap();
        store
    }

    #[tokio::test]
    async fn test_update_flushes_related_table_entries() {
        let store = seeded("posts");
        let cache = ModelCache::new(store.clone(), CacheConfig::default()).unwrap();
        let query = Query::table("users").with(Relation::new("posts", "posts"));

        let decision = cache.invalidate_after_persisting(&query, None).await.unwrap();
        assert_eq!(decision, FlushDecision::Flushed);
        assert!(store.is_empty());
        assert_eq!(cache.stats().flushes, 1);
    }

    #[tokio::test]
    async fn test_builder_override_beats_config() {
        let store = seeded("users");
        let cache = ModelCache::new(store.clone(), CacheConfig::default()).unwrap();
        let query = Query::table("users");
        let window = Some(Duration::from_secs(60));

        cache.invalidate_after_persisting(&query, window).await.unwrap();
        let tags: CacheTags = ["users"].into_iter().collect();
        store
            .put(
                &tags,
                &hashed_key_from("again"),
                &StoredEntry {
                    key: "again".into(),
                    value: QueryOutput::Count(2),
                },
            )
            .unwrap();

        let decision = cache.invalidate_after_persisting(&query, window).await.unwrap();
        assert_eq!(decision, FlushDecision::Deferred);
        assert_eq!(store.len(), 1);
        assert_eq!(cache.stats().deferred_flushes, 1);
    }

    #[tokio::test]
    async fn test_delete_ignores_open_window() {
        let store = seeded("users");
        let cache = ModelCache::new(
            store.clone(),
            CacheConfig::default().with_cooldown(Duration::from_secs(60)),
        )
        .unwrap();
        let query = Query::table("users");

        cache.invalidate_after_persisting(&query, None).await.unwrap();
        let tags: CacheTags = ["users"].into_iter().collect();
        store
            .put(
                &tags,
                &hashed_key_from("again"),
                &StoredEntry {
                    key: "again".into(),
                    value: QueryOutput::Count(2),
                },
            )
            .unwrap();

        assert_eq!(cache.flush_now(&query).await.unwrap(), 1);
        assert!(store.is_empty());
        assert_eq!(store.flush(&tags).await.unwrap(), 0);
    }
}
