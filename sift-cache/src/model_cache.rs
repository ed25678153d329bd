//! Shared cache handle.
//!
//! A [`ModelCache`] bundles everything that is process-wide: the cache
//! store, the cooldown gate, per-key locks, the key digest, the cachability
//! predicate, configuration and statistics. It is cheap to clone; every
//! [`CachedBuilder`](crate::CachedBuilder) holds one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sift_core::{
    CacheConfig, Clock, ConfigError, Operation, Query, QueryExecutor, SiftResult, SystemClock,
};

use crate::builder::CachedBuilder;
use crate::cachability::{Cachability, DefaultCachability};
use crate::cooldown::{CooldownGate, CooldownStore, InMemoryCooldownStore};
use crate::key::{base_key, make_cache_key, CacheKey, KeyDigest, Sha256KeyDigest};
use crate::lock::KeyLocks;
use crate::stats::{CacheStats, StatsRecorder};
use crate::tags::{make_cache_tags, table_tag, CacheTags};
use crate::traits::CacheStore;

pub(crate) struct Inner {
    pub store: Arc<dyn CacheStore>,
    pub gate: CooldownGate,
    pub locks: KeyLocks,
    pub digest: Arc<dyn KeyDigest>,
    pub cachability: Arc<dyn Cachability>,
    pub config: CacheConfig,
    pub enabled: AtomicBool,
    pub stats: StatsRecorder,
}

/// Process-wide query cache.
///
/// # Example
///
/// ```ignore
/// let cache = ModelCache::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::from_env())?;
///
/// let user = cache
///     .query(executor.clone(), "users")
///     .find(5, &["*"])
///     .await?;
/// ```
#[derive(Clone)]
pub struct ModelCache {
    pub(crate) inner: Arc<Inner>,
}

impl ModelCache {
    /// Create a cache with wall-clock time, in-memory cooldown state,
    /// SHA-256 keys and the default cachability rules.
    ///
    /// Fails if `config` does not validate.
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Result<Self, ConfigError> {
        Self::builder(store).config(config).build()
    }

    /// Start building a cache with non-default collaborators.
    pub fn builder(store: Arc<dyn CacheStore>) -> ModelCacheBuilder {
        ModelCacheBuilder {
            store,
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
            cooldown_store: Arc::new(InMemoryCooldownStore::new()),
            digest: Arc::new(Sha256KeyDigest),
            cachability: Arc::new(DefaultCachability),
        }
    }

    /// Start a cached query against `table`.
    pub fn query<E: QueryExecutor + ?Sized>(&self, executor: Arc<E>, table: impl Into<String>) -> CachedBuilder<E> {
        CachedBuilder::new(executor, self.clone(), Query::table(table))
    }

    /// Wrap an already-built query.
    pub fn wrap<E: QueryExecutor + ?Sized>(&self, executor: Arc<E>, query: Query) -> CachedBuilder<E> {
        CachedBuilder::new(executor, self.clone(), query)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &dyn CacheStore {
        self.inner.store.as_ref()
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.inner.gate
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Runtime master switch. Starts from `CacheConfig::enabled`.
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Cooldown identity of a table.
    pub fn entity(&self, table: &str) -> String {
        table_tag(&self.inner.config.prefix, table)
    }

    /// Caching is on and the predicate accepts the query.
    pub fn is_cachable(&self, query: &Query) -> bool {
        self.is_enabled() && self.inner.cachability.is_cachable(query)
    }

    pub fn cache_tags(&self, query: &Query) -> CacheTags {
        make_cache_tags(query, &self.inner.config.prefix)
    }

    /// Derive the key for `operation` on `query`, including the cooldown
    /// epoch of the table and of each eager-loaded table with an open window.
    pub async fn cache_key(&self, query: &Query, operation: &Operation) -> SiftResult<CacheKey> {
        let entity = self.entity(query.table_name());
        let epoch = self.inner.gate.epoch(&entity).await?;
        let mut base = base_key(&self.inner.config.prefix, query.table_name(), epoch);
        for relation in query.eager_loads() {
            let related = self.inner.gate.epoch(&self.entity(&relation.table)).await?;
            if let Some(epoch) = related {
                base.push_str(&format!(":{}_cooldown_{}", relation.table, epoch));
            }
        }
        Ok(make_cache_key(
            query,
            &base,
            &operation.columns(),
            &operation.discriminator(),
        ))
    }

    /// Drop every cached entry that depends on `table`.
    pub async fn flush_table(&self, table: &str) -> SiftResult<u64> {
        let tags: CacheTags = [self.entity(table)].into_iter().collect();
        let removed = self.inner.store.flush(&tags).await?;
        StatsRecorder::bump(&self.inner.stats.flushes);
        tracing::debug!(table, removed, "table cache flushed");
        Ok(removed)
    }
}

/// Builder for [`ModelCache`].
pub struct ModelCacheBuilder {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    cooldown_store: Arc<dyn CooldownStore>,
    digest: Arc<dyn KeyDigest>,
    cachability: Arc<dyn Cachability>,
}

impl ModelCacheBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cooldown_store(mut self, store: Arc<dyn CooldownStore>) -> Self {
        self.cooldown_store = store;
        self
    }

    pub fn digest(mut self, digest: Arc<dyn KeyDigest>) -> Self {
        self.digest = digest;
        self
    }

    pub fn cachability(mut self, cachability: Arc<dyn Cachability>) -> Self {
        self.cachability = cachability;
        self
    }

    /// Validate the configuration and assemble the cache.
    pub fn build(self) -> Result<ModelCache, ConfigError> {
        self.config.validate()?;
        let enabled = AtomicBool::new(self.config.enabled);
        Ok(ModelCache {
            inner: Arc::new(Inner {
                store: self.store,
                gate: CooldownGate::new(self.cooldown_store, self.clock),
                locks: KeyLocks::new(),
                digest: self.digest,
                cachability: self.cachability,
                config: self.config,
                enabled,
                stats: StatsRecorder::default(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCacheStore;
    use sift_core::all_columns;
    use sift_test_utils::ManualClock;
    use std::time::Duration;

    fn cache_with_clock(clock: Arc<ManualClock>, config: CacheConfig) -> ModelCache {
        ModelCache::builder(Arc::new(InMemoryCacheStore::new()))
            .config(config)
            .clock(clock)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_key_includes_prefix() {
        let cache = ModelCache::new(
            Arc::new(InMemoryCacheStore::new()),
            CacheConfig::new().with_prefix("app:"),
        )
        .unwrap();
        let op = Operation::Find {
            id: 5.into(),
            columns: all_columns(),
        };
        let key = cache.cache_key(&Query::table("users"), &op).await.unwrap();
        assert_eq!(key.as_str(), "app:users-find_5");
    }

    #[tokio::test]
    async fn test_key_carries_epoch_during_window() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with_clock(clock.clone(), CacheConfig::default());
        let query = Query::table("users");
        let op = Operation::Count {
            columns: all_columns(),
        };

        let cold = cache.cache_key(&query, &op).await.unwrap();
        cache
            .gate()
            .flush_after_persisting(
                "users",
                Some(Duration::from_secs(10)),
                &cache.cache_tags(&query),
                cache.store(),
            )
            .await
            .unwrap();
        let warm = cache.cache_key(&query, &op).await.unwrap();
        assert_ne!(cold, warm);
        assert!(warm.as_str().starts_with("users:cooldown_"));

        clock.advance(Duration::from_secs(10));
        let expired = cache.cache_key(&query, &op).await.unwrap();
        assert_eq!(cold, expired);
    }

    #[test]
    fn test_runtime_toggle() {
        let cache =
            ModelCache::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::default()).unwrap();
        let query = Query::table("users");
        assert!(cache.is_cachable(&query));
        cache.set_enabled(false);
        assert!(!cache.is_cachable(&query));
    }

    #[test]
    fn test_custom_cachability() {
        let cache = ModelCache::builder(Arc::new(InMemoryCacheStore::new()))
            .cachability(Arc::new(|q: &Query| q.table_name() != "sessions"))
            .build()
            .unwrap();
        assert!(cache.is_cachable(&Query::table("users")));
        assert!(!cache.is_cachable(&Query::table("sessions")));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = ModelCache::builder(Arc::new(InMemoryCacheStore::new()))
            .config(CacheConfig::new().with_default_per_page(0))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "default_per_page"
        ));
    }

    #[tokio::test]
    async fn test_key_carries_related_epoch_during_window() {
        let clock = Arc::new(ManualClock::new());
        let cache = cache_with_clock(clock.clone(), CacheConfig::default());
        let posts = Query::table("posts").with(sift_core::Relation::new("user", "users"));
        let op = Operation::Get {
            columns: all_columns(),
        };

        let cold = cache.cache_key(&posts, &op).await.unwrap();
        cache
            .gate()
            .flush_after_persisting(
                "users",
                Some(Duration::from_secs(10)),
                &cache.cache_tags(&Query::table("users")),
                cache.store(),
            )
            .await
            .unwrap();
        let warm = cache.cache_key(&posts, &op).await.unwrap();
        assert_ne!(cold, warm);
        assert!(warm.as_str().starts_with("posts:users_cooldown_"));
    }
}
