//! Cache key derivation.
//!
//! A [`CacheKey`] spells out everything that determines a read's result:
//! the table (with prefix and any active cooldown epoch), the requested
//! columns, every predicate in the order it was applied, eager loads,
//! ordering, the pagination window and the operation discriminator.
//! Column lists and predicate values are JSON-encoded so an identifier or a
//! string value can never be read as part of a neighbouring segment.
//!
//! The key itself can be long, so stores address entries by its
//! [`HashedCacheKey`]. The plain key travels with the stored value and is
//! compared on every read to catch digest collisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sift_core::{Condition, Order, Predicate, Query};
use std::fmt;
use std::fmt::Write as _;

/// Full, human-readable cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-length digest of a [`CacheKey`]; the storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashedCacheKey(String);

impl HashedCacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HashedCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps cache keys to storage slots.
pub trait KeyDigest: Send + Sync {
    fn digest(&self, key: &CacheKey) -> HashedCacheKey;
}

/// SHA-256, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256KeyDigest;

impl KeyDigest for Sha256KeyDigest {
    fn digest(&self, key: &CacheKey) -> HashedCacheKey {
        HashedCacheKey(hex::encode(Sha256::digest(key.as_str().as_bytes())))
    }
}

/// Build a digest slot from an arbitrary string. Used by digests other than
/// [`Sha256KeyDigest`].
pub fn hashed_key_from(slot: impl Into<String>) -> HashedCacheKey {
    HashedCacheKey(slot.into())
}

/// Per-entity part of every key: prefix, table and, while a cooldown window
/// is open, the window's epoch marker.
pub fn base_key(prefix: &str, table: &str, cooldown_epoch: Option<i64>) -> String {
    match cooldown_epoch {
        Some(epoch) => format!("{}{}:cooldown_{}", prefix, table, epoch),
        None => format!("{}{}", prefix, table),
    }
}

/// Derive the cache key for a read.
///
/// Pure: the same query state, base, columns and discriminator always give
/// the same key.
pub fn make_cache_key(
    query: &Query,
    base: &str,
    columns: &[String],
    discriminator: &str,
) -> CacheKey {
    let mut key = String::from(base);

    if !is_wildcard(columns) {
        key.push('_');
        key.push_str(&json(&Value::from(columns.to_vec())));
    }

    push_predicates(&mut key, query.wheres());

    for relation in query.eager_loads() {
        let _ = write!(key, "-with_{}", relation.name);
    }

    for order in query.orders() {
        match order {
            Order::Column { column, direction } => {
                let _ = write!(key, "_orderBy_{}_{}", column, direction.as_str());
            }
            Order::Random => key.push_str("_orderByRandom"),
            Order::Raw { sql } => {
                let _ = write!(key, "_orderByRaw_{}", json(&Value::String(sql.clone())));
            }
        }
    }

    if let Some(offset) = query.offset_value() {
        let _ = write!(key, "-offset_{}", offset);
    }
    if let Some(limit) = query.limit_value() {
        let _ = write!(key, "-limit_{}", limit);
    }
    if let Some(lock) = query.lock_mode() {
        let _ = write!(key, "-lock_{:?}", lock);
    }

    key.push_str(discriminator);
    CacheKey(key)
}

fn is_wildcard(columns: &[String]) -> bool {
    columns.is_empty() || (columns.len() == 1 && columns[0] == "*")
}

fn json(value: &Value) -> String {
    value.to_string()
}

fn push_predicates(key: &mut String, predicates: &[Predicate]) {
    for predicate in predicates {
        let _ = write!(key, "-{}_", predicate.boolean.as_str());
        match &predicate.condition {
            Condition::Basic {
                column,
                operator,
                value,
            } => {
                let _ = write!(key, "{}_{}_{}", column, operator, json(value));
            }
            Condition::In {
                column,
                values,
                negated,
            } => {
                let op = if *negated { "notin" } else { "in" };
                let _ = write!(key, "{}_{}_{}", column, op, json(&Value::Array(values.clone())));
            }
            Condition::Null { column, negated } => {
                let op = if *negated { "notnull" } else { "null" };
                let _ = write!(key, "{}_{}", column, op);
            }
            Condition::Between {
                column,
                low,
                high,
                negated,
            } => {
                let op = if *negated { "notbetween" } else { "between" };
                let _ = write!(key, "{}_{}_{}_{}", column, op, json(low), json(high));
            }
            Condition::Column {
                first,
                operator,
                second,
            } => {
                let _ = write!(key, "{}_{}_column_{}", first, operator, second);
            }
            Condition::Nested(inner) => {
                key.push('(');
                push_predicates(key, inner);
                key.push(')');
            }
            Condition::Raw { sql, bindings } => {
                let _ = write!(
                    key,
                    "raw_{}_{}",
                    json(&Value::String(sql.clone())),
                    json(&Value::Array(bindings.clone()))
                );
            }
        }
    }
}
