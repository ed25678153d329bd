//! Cached query builder.
//!
//! [`CachedBuilder`] wraps a [`Query`] and an executor. Reads go through the
//! cache when the query is cachable and straight to the executor otherwise;
//! writes run invalidation bookkeeping first and only then reach the
//! executor.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sift_core::{
    all_columns, dispatch, Direction, Operation, Operator, Page, Pluck, Query, QueryExecutor,
    QueryOutput, Relation, Row, SiftResult,
};

use crate::model_cache::ModelCache;
use crate::stats::StatsRecorder;

/// Query builder whose reads are cached.
///
/// Query-building methods consume and return the builder; reads and writes
/// borrow it, so a built query can be run more than once.
pub struct CachedBuilder<E: QueryExecutor + ?Sized> {
    executor: Arc<E>,
    cache: ModelCache,
    query: Query,
    caching_disabled: bool,
    cooldown: Option<Duration>,
}

impl<E: QueryExecutor + ?Sized> Clone for CachedBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            cache: self.cache.clone(),
            query: self.query.clone(),
            caching_disabled: self.caching_disabled,
            cooldown: self.cooldown,
        }
    }
}

impl<E: QueryExecutor + ?Sized> CachedBuilder<E> {
    pub fn new(executor: Arc<E>, cache: ModelCache, query: Query) -> Self {
        Self {
            executor,
            cache,
            query,
            caching_disabled: false,
            cooldown: None,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Every read on this builder skips the cache.
    pub fn without_cache(mut self) -> Self {
        self.caching_disabled = true;
        self
    }

    /// Cooldown window for writes issued through this builder, overriding
    /// the configured one.
    pub fn with_cache_cooldown(mut self, window: Duration) -> Self {
        self.cooldown = Some(window);
        self
    }

    /// Apply arbitrary query-building steps.
    pub fn scope(mut self, build: impl FnOnce(Query) -> Query) -> Self {
        self.query = build(self.query);
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope(|q| q.where_eq(column, value))
    }

    pub fn where_op(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.scope(|q| q.where_op(column, operator, value))
    }

    pub fn or_where(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.scope(|q| q.or_where(column, operator, value))
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.scope(|q| q.where_in(column, values))
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.scope(|q| q.where_null(column))
    }

    pub fn order_by(self, column: impl Into<String>, direction: Direction) -> Self {
        self.scope(|q| q.order_by(column, direction))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.scope(|q| q.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.scope(|q| q.offset(offset))
    }

    pub fn with(self, relation: Relation) -> Self {
        self.scope(|q| q.with(relation))
    }

    pub fn lock_for_update(self) -> Self {
        self.scope(Query::lock_for_update)
    }

    pub fn in_random_order(self) -> Self {
        self.scope(Query::in_random_order)
    }

    /// Whether reads on this builder use the cache right now.
    pub fn is_cachable(&self) -> bool {
        !self.caching_disabled && self.cache.is_cachable(&self.query)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn get(&self, columns: &[&str]) -> SiftResult<Vec<Row>> {
        self.fetch(Operation::Get {
            columns: column_list(columns),
        })
        .await?
        .into_rows("get")
    }

    pub async fn first(&self, columns: &[&str]) -> SiftResult<Option<Row>> {
        self.fetch(Operation::First {
            columns: column_list(columns),
        })
        .await?
        .into_row("first")
    }

    pub async fn find(&self, id: impl Into<Value>, columns: &[&str]) -> SiftResult<Option<Row>> {
        self.fetch(Operation::Find {
            id: id.into(),
            columns: column_list(columns),
        })
        .await?
        .into_row("find")
    }

    pub async fn count(&self, columns: &[&str]) -> SiftResult<u64> {
        self.fetch(Operation::Count {
            columns: column_list(columns),
        })
        .await?
        .into_count("count")
    }

    pub async fn sum(&self, column: &str) -> SiftResult<Option<Value>> {
        self.fetch(Operation::Sum {
            column: column.to_string(),
        })
        .await?
        .into_scalar("sum")
    }

    pub async fn avg(&self, column: &str) -> SiftResult<Option<Value>> {
        self.fetch(Operation::Avg {
            column: column.to_string(),
        })
        .await?
        .into_scalar("avg")
    }

    pub async fn min(&self, column: &str) -> SiftResult<Option<Value>> {
        self.fetch(Operation::Min {
            column: column.to_string(),
        })
        .await?
        .into_scalar("min")
    }

    pub async fn max(&self, column: &str) -> SiftResult<Option<Value>> {
        self.fetch(Operation::Max {
            column: column.to_string(),
        })
        .await?
        .into_scalar("max")
    }

    pub async fn pluck(&self, column: &str, key: Option<&str>) -> SiftResult<Pluck> {
        self.fetch(Operation::Pluck {
            column: column.to_string(),
            key: key.map(str::to_string),
        })
        .await?
        .into_pluck("pluck")
    }

    /// Paginated read. `per_page` falls back to the configured default and
    /// `page` to 1.
    pub async fn paginate(
        &self,
        per_page: Option<u64>,
        columns: &[&str],
        page_name: &str,
        page: Option<u64>,
    ) -> SiftResult<Page> {
        self.fetch(Operation::Paginate {
            per_page: per_page.unwrap_or(self.cache.config().default_per_page),
            columns: column_list(columns),
            page_name: page_name.to_string(),
            page: page.unwrap_or(1),
        })
        .await?
        .into_page("paginate")
    }

    pub async fn value(&self, column: &str) -> SiftResult<Option<Value>> {
        self.fetch(Operation::Value {
            column: column.to_string(),
        })
        .await?
        .into_scalar("value")
    }

    /// Run any read operation, returning the untyped output.
    pub async fn fetch(&self, operation: Operation) -> SiftResult<QueryOutput> {
        if !self.is_cachable() {
            StatsRecorder::bump(&self.cache.inner.stats.uncached);
            tracing::trace!(
                table = self.query.table_name(),
                operation = %operation.kind(),
                "query not cachable"
            );
            return Ok(dispatch(self.executor.as_ref(), &self.query, &operation).await?);
        }
        self.cache
            .cached_value(self.executor.as_ref(), &self.query, &operation)
            .await
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    pub async fn insert(&self, values: &[Row]) -> SiftResult<bool> {
        self.cache
            .invalidate_after_persisting(&self.query, self.cooldown)
            .await?;
        Ok(self.executor.insert(&self.query, values).await?)
    }

    pub async fn update(&self, values: &Row) -> SiftResult<u64> {
        self.cache
            .invalidate_after_persisting(&self.query, self.cooldown)
            .await?;
        Ok(self.executor.update(&self.query, values).await?)
    }

    /// Deletes flush immediately, whatever the cooldown.
    pub async fn delete(&self) -> SiftResult<u64> {
        self.cache.flush_now(&self.query).await?;
        Ok(self.executor.delete(&self.query).await?)
    }

    /// Drop every cached entry for this builder's table.
    pub async fn flush_cache(&self) -> SiftResult<u64> {
        self.cache.flush_table(self.query.table_name()).await
    }
}

fn column_list(columns: &[&str]) -> Vec<String> {
    if columns.is_empty() {
        return all_columns();
    }
    columns.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_list_defaults_to_wildcard() {
        assert_eq!(column_list(&[]), all_columns());
        assert_eq!(column_list(&["id", "name"]), vec!["id", "name"]);
    }
}
