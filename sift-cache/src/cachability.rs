//! Whether a query may be served from the cache at all.

use sift_core::Query;

/// Caller-configurable cachability predicate.
///
/// Consulted at the start of every read, before any key is derived.
/// Closures `Fn(&Query) -> bool` implement it directly.
pub trait Cachability: Send + Sync {
    fn is_cachable(&self, query: &Query) -> bool;
}

impl<F> Cachability for F
where
    F: Fn(&Query) -> bool + Send + Sync,
{
    fn is_cachable(&self, query: &Query) -> bool {
        self(query)
    }
}

/// Built-in rules: row locks, random ordering and eager loads of models that
/// opted out of caching all make a query uncachable.
///
/// Custom predicates usually start from these:
///
/// ```ignore
/// let policy = |q: &Query| DefaultCachability.is_cachable(q) && q.table_name() != "sessions";
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCachability;

impl Cachability for DefaultCachability {
    fn is_cachable(&self, query: &Query) -> bool {
        query.lock_mode().is_none()
            && !query.has_random_order()
            && query.eager_loads().iter().all(|r| r.cachable)
    }
}
