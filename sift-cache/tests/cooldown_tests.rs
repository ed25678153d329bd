//! Cooldown windows seen through the cached builder.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sift_cache::{CachedBuilder, InMemoryCacheStore, ModelCache};
use sift_core::{CacheConfig, Relation};
use sift_test_utils::{row, ManualClock, MockExecutor};

const WINDOW: Duration = Duration::from_secs(30);

struct Fixture {
    cache: ModelCache,
    clock: Arc<ManualClock>,
    executor: Arc<MockExecutor>,
}

impl Fixture {
    fn new(config: CacheConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let cache = ModelCache::builder(Arc::new(InMemoryCacheStore::new()))
            .config(config)
            .clock(clock.clone())
            .build()
            .unwrap();
        let executor = MockExecutor::new();
        executor.seed(
            "users",
            (1..=3)
                .map(|id| row([("id", json!(id)), ("score", json!(0))]))
                .collect(),
        );
        executor.seed("posts", vec![row([("id", json!(1)), ("score", json!(0))])]);
        Self {
            cache,
            clock,
            executor: Arc::new(executor),
        }
    }

    fn table(&self, table: &str) -> CachedBuilder<MockExecutor> {
        self.cache.query(self.executor.clone(), table)
    }

    async fn set_score(&self, table: &str, score: i64) {
        self.table(table)
            .where_eq("id", 1)
            .update(&row([("score", score)]))
            .await
            .unwrap();
    }

    async fn total(&self, table: &str) -> serde_json::Value {
        self.table(table).sum("score").await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn write_burst_costs_one_flush() {
    let fx = Fixture::new(CacheConfig::default().with_cooldown(WINDOW));

    assert_eq!(fx.total("users").await, json!(0));
    for score in 1..=5 {
        fx.set_score("users", score).await;
    }

    let stats = fx.cache.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.deferred_flushes, 4);

    fx.clock.advance(WINDOW);
    assert_eq!(fx.total("users").await, json!(5));
    assert_eq!(fx.cache.stats().flushes, 2);
}

#[tokio::test]
async fn reads_inside_window_are_bounded_stale() {
    let fx = Fixture::new(CacheConfig::default().with_cooldown(WINDOW));

    // Opening write flushes right away.
    fx.set_score("users", 1).await;
    assert_eq!(fx.total("users").await, json!(1));

    // Deferred: the cached total is served until the window closes.
    fx.set_score("users", 2).await;
    fx.clock.advance(WINDOW / 2);
    assert_eq!(fx.total("users").await, json!(1));
    assert_eq!(fx.executor.calls("sum"), 1);

    fx.clock.advance(WINDOW / 2);
    assert_eq!(fx.total("users").await, json!(2));
    assert_eq!(fx.executor.calls("sum"), 2);
}

#[tokio::test]
async fn without_window_every_write_flushes() {
    let fx = Fixture::new(CacheConfig::default());

    for score in 1..=3 {
        fx.set_score("users", score).await;
        assert_eq!(fx.total("users").await, json!(score));
    }
    assert_eq!(fx.cache.stats().flushes, 3);
    assert_eq!(fx.cache.stats().deferred_flushes, 0);
}

#[tokio::test]
async fn table_override_applies_to_that_table_only() {
    let fx = Fixture::new(CacheConfig::default().with_table_cooldown("posts", WINDOW));

    fx.set_score("users", 1).await;
    fx.set_score("users", 2).await;
    assert_eq!(fx.cache.stats().deferred_flushes, 0);

    fx.set_score("posts", 1).await;
    fx.set_score("posts", 2).await;
    let stats = fx.cache.stats();
    assert_eq!(stats.flushes, 3);
    assert_eq!(stats.deferred_flushes, 1);
}

#[tokio::test]
async fn builder_cooldown_overrides_config() {
    let fx = Fixture::new(CacheConfig::default());

    for score in 1..=3 {
        fx.table("users")
            .with_cache_cooldown(WINDOW)
            .where_eq("id", 1)
            .update(&row([("score", score)]))
            .await
            .unwrap();
    }
    let stats = fx.cache.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.deferred_flushes, 2);

    fx.clock.advance(WINDOW);
    assert_eq!(fx.total("users").await, json!(3));
}

#[tokio::test]
async fn delete_inside_window_flushes_immediately() {
    let fx = Fixture::new(CacheConfig::default().with_cooldown(WINDOW));

    fx.set_score("users", 1).await;
    assert_eq!(fx.table("users").count(&[]).await.unwrap(), 3);

    fx.table("users").where_eq("id", 3).delete().await.unwrap();
    assert_eq!(fx.table("users").count(&[]).await.unwrap(), 2);
}

#[tokio::test]
async fn related_table_window_bounds_eager_load_staleness() {
    let fx = Fixture::new(CacheConfig::default().with_cooldown(WINDOW));
    let posts = || fx.table("posts").with(Relation::new("user", "users"));

    posts().get(&[]).await.unwrap();
    fx.set_score("users", 1).await;
    posts().get(&[]).await.unwrap();
    assert_eq!(fx.executor.calls("get"), 2);

    // Deferred inside the users window: the eager-loaded read stays cached.
    fx.set_score("users", 2).await;
    posts().get(&[]).await.unwrap();
    assert_eq!(fx.executor.calls("get"), 2);

    fx.clock.advance(Duration::from_secs(3600));
    posts().get(&[]).await.unwrap();
    assert_eq!(fx.executor.calls("get"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_open_one_window() {
    const WRITERS: u64 = 8;
    let fx = Fixture::new(CacheConfig::default().with_cooldown(WINDOW));

    let mut handles = Vec::new();
    for score in 0..WRITERS {
        let builder = fx.table("users").where_eq("id", 1);
        handles.push(tokio::spawn(async move {
            builder.update(&row([("score", score)])).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = fx.cache.stats();
    assert_eq!(stats.flushes, 1);
    assert_eq!(stats.deferred_flushes, WRITERS - 1);
    assert_eq!(fx.executor.calls("update"), WRITERS as usize);
}
