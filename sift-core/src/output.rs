//! Result types produced by the executor and stored in the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, SiftResult};

/// A single result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// One page of a paginated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Row>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub page_name: String,
}

impl Page {
    /// Number of the last page, at least 1.
    pub fn last_page(&self) -> u64 {
        if self.per_page == 0 {
            return 1;
        }
        self.total.div_ceil(self.per_page).max(1)
    }
}

/// Result of a `pluck` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pluck {
    /// Values of a single column, in row order.
    Values(Vec<Value>),
    /// `(key, value)` pairs when a key column was requested, in row order.
    Keyed(Vec<(Value, Value)>),
}

/// Everything a cached read can produce.
///
/// The variant is stored alongside the originating key, so a read can
/// verify it got back the shape its operation expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryOutput {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Count(u64),
    /// Aggregates (`sum`, `avg`, `min`, `max`) and `value`.
    Scalar(Option<Value>),
    Pluck(Pluck),
    Page(Page),
}

impl QueryOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryOutput::Rows(_) => "rows",
            QueryOutput::Row(_) => "row",
            QueryOutput::Count(_) => "count",
            QueryOutput::Scalar(_) => "scalar",
            QueryOutput::Pluck(_) => "pluck",
            QueryOutput::Page(_) => "page",
        }
    }

    fn unexpected<T>(self, operation: &'static str) -> SiftResult<T> {
        Err(CacheError::UnexpectedOutput {
            operation,
            found: self.kind(),
        }
        .into())
    }

    pub fn into_rows(self, operation: &'static str) -> SiftResult<Vec<Row>> {
        match self {
            QueryOutput::Rows(rows) => Ok(rows),
            other => other.unexpected(operation),
        }
    }

    pub fn into_row(self, operation: &'static str) -> SiftResult<Option<Row>> {
        match self {
            QueryOutput::Row(row) => Ok(row),
            other => other.unexpected(operation),
        }
    }

    pub fn into_count(self, operation: &'static str) -> SiftResult<u64> {
        match self {
            QueryOutput::Count(n) => Ok(n),
            other => other.unexpected(operation),
        }
    }

    pub fn into_scalar(self, operation: &'static str) -> SiftResult<Option<Value>> {
        match self {
            QueryOutput::Scalar(v) => Ok(v),
            other => other.unexpected(operation),
        }
    }

    pub fn into_pluck(self, operation: &'static str) -> SiftResult<Pluck> {
        match self {
            QueryOutput::Pluck(p) => Ok(p),
            other => other.unexpected(operation),
        }
    }

    pub fn into_page(self, operation: &'static str) -> SiftResult<Page> {
        match self {
            QueryOutput::Page(p) => Ok(p),
            other => other.unexpected(operation),
        }
    }
}
