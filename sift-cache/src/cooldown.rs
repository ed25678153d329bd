//! Cooldown gate for invalidation flushes.
//!
//! Write bursts against one table would otherwise flush that table's tags
//! once per row. The gate coalesces them: the first write of a burst opens
//! a cooldown window and flushes immediately, later writes inside the
//! window only record their tags as pending, and the first read after the
//! window closes flushes everything pending.
//!
//! # State Transition Diagram
//!
//! ```text
//!  Cold ── write ──→ Warm (flush now, expires_at = now + window)
//!                     │  write: add tags to pending, no flush
//!                     │
//!                     └─ read after expires_at ──→ Cold (flush pending)
//! ```
//!
//! A read therefore never sees data staler than one cooldown window.
//!
//! State lives in a [`CooldownStore`] and is only ever replaced by
//! compare-and-swap, so two concurrent writers cannot both believe they
//! opened the window, and a pending flush recorded by one writer cannot be
//! dropped by another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_core::{Clock, ConfigError, SiftResult};
use tokio::sync::Mutex;

use crate::tags::CacheTags;
use crate::traits::CacheStore;

/// Cooldown bookkeeping for one entity (a prefixed table name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    /// When the window opened. Doubles as the key epoch marker.
    pub entered_at: DateTime<Utc>,
    /// First instant at which the window counts as closed.
    pub expires_at: DateTime<Utc>,
    /// Tags of writes whose flush was deferred.
    pub pending: CacheTags,
}

impl CooldownState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn epoch(&self) -> i64 {
        self.entered_at.timestamp_millis()
    }

    fn covers(&self, tags: &CacheTags) -> bool {
        tags.iter().all(|t| self.pending.contains(t))
    }
}

/// Storage for cooldown state, shared by every process using the cache.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn load(&self, entity: &str) -> SiftResult<Option<CooldownState>>;

    /// Replace the entity's state with `new` only if it currently equals
    /// `expected`. `None` means absent. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        entity: &str,
        expected: Option<&CooldownState>,
        new: Option<CooldownState>,
    ) -> SiftResult<bool>;
}

/// Process-local [`CooldownStore`].
#[derive(Debug, Default)]
pub struct InMemoryCooldownStore {
    states: Mutex<HashMap<String, CooldownState>>,
}

impl InMemoryCooldownStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CooldownStore for InMemoryCooldownStore {
    async fn load(&self, entity: &str) -> SiftResult<Option<CooldownState>> {
        Ok(self.states.lock().await.get(entity).cloned())
    }

    async fn compare_and_swap(
        &self,
        entity: &str,
        expected: Option<&CooldownState>,
        new: Option<CooldownState>,
    ) -> SiftResult<bool> {
        let mut states = self.states.lock().await;
        if states.get(entity) != expected {
            return Ok(false);
        }
        match new {
            Some(state) => {
                states.insert(entity.to_string(), state);
            }
            None => {
                states.remove(entity);
            }
        }
        Ok(true)
    }
}

/// What a write's invalidation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Tags were flushed before returning.
    Flushed,
    /// A window was open; the flush was recorded as pending.
    Deferred,
}

/// Per-entity cooldown state machine.
#[derive(Clone)]
pub struct CooldownGate {
    store: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn CooldownStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Epoch marker of the entity's open window, if any.
    pub async fn epoch(&self, entity: &str) -> SiftResult<Option<i64>> {
        let now = self.clock.now();
        Ok(self
            .store
            .load(entity)
            .await?
            .filter(|s| !s.is_expired(now))
            .map(|s| s.epoch()))
    }

    /// Invalidation after an insert or update.
    ///
    /// Without a window every write flushes. With one, the write that opens
    /// the window flushes (along with anything left pending by an expired
    /// window) and the rest of the window's writes defer.
    pub async fn flush_after_persisting<S>(
        &self,
        entity: &str,
        window: Option<Duration>,
        tags: &CacheTags,
        cache: &S,
    ) -> SiftResult<FlushDecision>
    where
        S: CacheStore + ?Sized,
    {
        let Some(window) = window.filter(|w| !w.is_zero()) else {
            cache.flush(tags).await?;
            return Ok(FlushDecision::Flushed);
        };
        let window = chrono::Duration::from_std(window).map_err(|e| ConfigError::InvalidValue {
            field: "cooldown".to_string(),
            value: format!("{:?}", window),
            reason: e.to_string(),
        })?;

        loop {
            let now = self.clock.now();
            let current = self.store.load(entity).await?;

            match &current {
                Some(state) if !state.is_expired(now) => {
                    if state.covers(tags) {
                        return Ok(FlushDecision::Deferred);
                    }
                    let mut next = state.clone();
                    next.pending.extend(tags);
                    if self
                        .store
                        .compare_and_swap(entity, Some(state), Some(next))
                        .await?
                    {
                        tracing::debug!(entity, "cooldown active, flush deferred");
                        return Ok(FlushDecision::Deferred);
                    }
                }
                _ => {
                    let mut flush_tags = tags.clone();
                    if let Some(expired) = &current {
                        flush_tags.extend(&expired.pending);
                    }
                    let next = CooldownState {
                        entered_at: now,
                        expires_at: now
                            .checked_add_signed(window)
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                        pending: CacheTags::new(),
                    };
                    if self
                        .store
                        .compare_and_swap(entity, current.as_ref(), Some(next))
                        .await?
                    {
                        tracing::debug!(entity, "cooldown window opened");
                        self.flush_or_requeue(entity, &flush_tags, cache).await?;
                        return Ok(FlushDecision::Flushed);
                    }
                }
            }
        }
    }

    /// Close an expired window before a read, flushing whatever it deferred.
    ///
    /// Returns true if a pending flush ran.
    pub async fn remove_if_expired<S>(&self, entity: &str, cache: &S) -> SiftResult<bool>
    where
        S: CacheStore + ?Sized,
    {
        loop {
            let now = self.clock.now();
            let Some(state) = self.store.load(entity).await? else {
                return Ok(false);
            };
            if !state.is_expired(now) {
                return Ok(false);
            }
            if !self.store.compare_and_swap(entity, Some(&state), None).await? {
                continue;
            }
            if state.pending.is_empty() {
                return Ok(false);
            }
            tracing::debug!(entity, tags = state.pending.len(), "cooldown expired, flushing pending");
            self.flush_or_requeue(entity, &state.pending, cache).await?;
            return Ok(true);
        }
    }

    /// Flush `tags`; on failure record them as pending so the next expiry
    /// check flushes them, then return the flush error.
    async fn flush_or_requeue<S>(&self, entity: &str, tags: &CacheTags, cache: &S) -> SiftResult<()>
    where
        S: CacheStore + ?Sized,
    {
        let Err(err) = cache.flush(tags).await else {
            return Ok(());
        };
        if let Err(requeue_err) = self.requeue(entity, tags).await {
            tracing::warn!(entity, error = %requeue_err, "failed to record pending flush");
        }
        Err(err)
    }

    async fn requeue(&self, entity: &str, tags: &CacheTags) -> SiftResult<()> {
        loop {
            let now = self.clock.now();
            let current = self.store.load(entity).await?;
            let next = match &current {
                Some(state) => {
                    let mut next = state.clone();
                    next.pending.extend(tags);
                    next
                }
                None => CooldownState {
                    entered_at: now,
                    expires_at: now,
                    pending: tags.clone(),
                },
            };
            if self
                .store
                .compare_and_swap(entity, current.as_ref(), Some(next))
                .await?
            {
                return Ok(());
            }
        }
    }
}
