//! SIFT Cache - transparent query-result caching.
//!
//! Reads issued through a [`CachedBuilder`] are answered from a
//! [`CacheStore`] when possible. Every entry is tagged with the tables it
//! depends on, and writes flush those tags before touching the database.
//!
//! # Keys
//!
//! A read's key is derived from the full query state plus the operation
//! that produced it, so `count()` and `get()` on the same query never share
//! a slot. Keys are digested to fixed-length slots; the stored entry keeps
//! its full key so a digest collision is detected and repaired instead of
//! returning another query's result.
//!
//! # Cooldowns
//!
//! With a cooldown window configured, a burst of writes against one table
//! costs one flush: the first write flushes and opens the window, later
//! writes only record their tags, and the first read after the window
//! closes flushes the rest. See [`cooldown`].
//!
//! # Example
//!
//! ```ignore
//! let cache = ModelCache::new(Arc::new(InMemoryCacheStore::new()), CacheConfig::from_env())?;
//!
//! let active = cache
//!     .query(executor.clone(), "users")
//!     .where_eq("active", true)
//!     .count(&[])
//!     .await?;
//!
//! // Flushes every cached `users` read before running the update.
//! cache
//!     .query(executor, "users")
//!     .where_eq("id", 5)
//!     .update(&row([("active", false)]))
//!     .await?;
//! ```

pub mod builder;
pub mod cachability;
pub mod cooldown;
mod invalidation;
pub mod key;
pub mod lock;
pub mod memory;
pub mod model_cache;
mod retrieval;
pub mod stats;
pub mod tags;
pub mod traits;

pub use builder::CachedBuilder;
pub use cachability::{Cachability, DefaultCachability};
pub use cooldown::{CooldownGate, CooldownState, CooldownStore, FlushDecision, InMemoryCooldownStore};
pub use key::{base_key, make_cache_key, CacheKey, HashedCacheKey, KeyDigest, Sha256KeyDigest};
pub use lock::KeyLocks;
pub use memory::InMemoryCacheStore;
pub use model_cache::{ModelCache, ModelCacheBuilder};
pub use stats::CacheStats;
pub use tags::{make_cache_tags, table_tag, CacheTags};
pub use traits::{CacheStore, ComputeFuture, StoredEntry};
