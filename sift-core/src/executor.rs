//! The query executor the cache sits in front of.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExecutorResult;
use crate::operation::Operation;
use crate::output::{Page, Pluck, QueryOutput, Row};
use crate::query::Query;

/// Executes queries against the database.
///
/// One method per read and write the cache layer exposes. Every method
/// receives the builder state plus the caller's original arguments, and
/// returns the uncached result or the executor's own error.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn get(&self, query: &Query, columns: &[String]) -> ExecutorResult<Vec<Row>>;

    async fn first(&self, query: &Query, columns: &[String]) -> ExecutorResult<Option<Row>>;

    async fn find(
        &self,
        query: &Query,
        id: &Value,
        columns: &[String],
    ) -> ExecutorResult<Option<Row>>;

    async fn count(&self, query: &Query, columns: &[String]) -> ExecutorResult<u64>;

    async fn sum(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>>;

    async fn avg(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>>;

    async fn min(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>>;

    async fn max(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>>;

    async fn pluck(
        &self,
        query: &Query,
        column: &str,
        key: Option<&str>,
    ) -> ExecutorResult<Pluck>;

    async fn paginate(
        &self,
        query: &Query,
        per_page: u64,
        columns: &[String],
        page_name: &str,
        page: u64,
    ) -> ExecutorResult<Page>;

    async fn value(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>>;

    async fn insert(&self, query: &Query, values: &[Row]) -> ExecutorResult<bool>;

    async fn update(&self, query: &Query, values: &Row) -> ExecutorResult<u64>;

    async fn delete(&self, query: &Query) -> ExecutorResult<u64>;
}

/// Run a read operation against the executor, uncached.
pub async fn dispatch<E>(executor: &E, query: &Query, operation: &Operation) -> ExecutorResult<QueryOutput>
where
    E: QueryExecutor + ?Sized,
{
    let output = match operation {
        Operation::Get { columns } => QueryOutput::Rows(executor.get(query, columns).await?),
        Operation::First { columns } => QueryOutput::Row(executor.first(query, columns).await?),
        Operation::Find { id, columns } => {
            QueryOutput::Row(executor.find(query, id, columns).await?)
        }
        Operation::Count { columns } => QueryOutput::Count(executor.count(query, columns).await?),
        Operation::Sum { column } => QueryOutput::Scalar(executor.sum(query, column).await?),
        Operation::Avg { column } => QueryOutput::Scalar(executor.avg(query, column).await?),
        Operation::Min { column } => QueryOutput::Scalar(executor.min(query, column).await?),
        Operation::Max { column } => QueryOutput::Scalar(executor.max(query, column).await?),
        Operation::Pluck { column, key } => {
            QueryOutput::Pluck(executor.pluck(query, column, key.as_deref()).await?)
        }
        Operation::Paginate {
            per_page,
            columns,
            page_name,
            page,
        } => QueryOutput::Page(
            executor
                .paginate(query, *per_page, columns, page_name, *page)
                .await?,
        ),
        Operation::Value { column } => QueryOutput::Scalar(executor.value(query, column).await?),
    };
    Ok(output)
}
