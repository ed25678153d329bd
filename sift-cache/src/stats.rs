//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a stored entry.
    pub hits: u64,
    /// Reads that ran the query and stored the result.
    pub misses: u64,
    /// Reads that skipped the cache because caching did not apply.
    pub uncached: u64,
    /// Digest collisions detected and repaired.
    pub collisions: u64,
    /// Tag flushes issued by writes or expired cooldowns.
    pub flushes: u64,
    /// Write flushes deferred by an open cooldown window.
    pub deferred_flushes: u64,
    /// Reads answered directly by the executor after a store failure.
    pub bypasses: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub uncached: AtomicU64,
    pub collisions: AtomicU64,
    pub flushes: AtomicU64,
    pub deferred_flushes: AtomicU64,
    pub bypasses: AtomicU64,
}

impl StatsRecorder {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            uncached: self.uncached.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            deferred_flushes: self.deferred_flushes.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
        }
    }
}
