//! Cache tag derivation.

use serde::{Deserialize, Serialize};
use sift_core::Query;
use std::collections::BTreeSet;

/// The tables a cached result depends on.
///
/// Ordered so that iteration, logging and serialization are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheTags(BTreeSet<String>);

impl CacheTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn extend(&mut self, other: &CacheTags) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CacheTags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Tag for a single table.
pub fn table_tag(prefix: &str, table: &str) -> String {
    format!("{}{}", prefix, table)
}

/// One tag for the query's table and one per eager-loaded relation's table.
pub fn make_cache_tags(query: &Query, prefix: &str) -> CacheTags {
    let mut tags = CacheTags::new();
    tags.insert(table_tag(prefix, query.table_name()));
    for relation in query.eager_loads() {
        tags.insert(table_tag(prefix, &relation.table));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::Relation;

    #[test]
    fn test_primary_table_only() {
        let tags = make_cache_tags(&Query::table("users"), "app:");
        assert_eq!(tags.len(), 1);
        assert!(tags.contains("app:users"));
    }

    #[test]
    fn test_eager_loads_add_related_tables() {
        let q = Query::table("users")
            .with(Relation::new("posts", "posts"))
            .with(Relation::new("avatar", "images"));
        let tags = make_cache_tags(&q, "");
        let all: Vec<&str> = tags.iter().collect();
        assert_eq!(all, vec!["images", "posts", "users"]);
    }
}
