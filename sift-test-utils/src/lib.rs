//! SIFT Test Utilities
//!
//! Centralized test infrastructure for the SIFT workspace:
//! - An in-memory query executor with call counters and failure injection
//! - A manually driven clock
//! - Proptest generators for queries and read operations

pub use sift_core::{
    all_columns, CacheConfig, Clock, Condition, Direction, ExecutorError, ExecutorResult,
    Operation, Operator, Order, Page, Pluck, Predicate, Query, QueryExecutor, Relation, Row,
};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

// ============================================================================
// MOCK EXECUTOR
// ============================================================================

/// Executor over in-memory tables of JSON rows.
///
/// Understands every predicate except raw SQL (which matches all rows) and
/// column ordering. Counts calls per method so tests can tell whether a read
/// was served from the cache.
#[derive(Debug, Default)]
pub struct MockExecutor {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failure: Mutex<Option<ExecutorError>>,
    latency: Option<Duration>,
}

const READS: [&str; 11] = [
    "get", "first", "find", "count", "sum", "avg", "min", "max", "pluck", "paginate", "value",
];

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the contents of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Every following call fails with `err` until [`recover`](Self::recover).
    pub fn fail_with(&self, err: ExecutorError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Calls made to one method, e.g. `"find"`.
    pub fn calls(&self, method: &str) -> usize {
        self.call_counts().get(method).copied().unwrap_or(0)
    }

    /// Calls made to any read method.
    pub fn reads(&self) -> usize {
        READS.iter().map(|m| self.calls(m)).sum()
    }

    pub fn reset_calls(&self) {
        self.call_counts().clear();
    }

    fn call_counts(&self) -> MutexGuard<'_, HashMap<&'static str, usize>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, method: &'static str) -> ExecutorResult<()> {
        *self.call_counts().entry(method).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone();
        failure.map_or(Ok(()), Err)
    }

    /// Rows matching the predicates, ordered, without the limit window.
    fn filtered(&self, query: &Query) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .rows(query.table_name())
            .into_iter()
            .filter(|row| matches(row, query.wheres()))
            .collect();
        for order in query.orders().iter().rev() {
            if let Order::Column { column, direction } = order {
                rows.sort_by(|a, b| {
                    let ord = compare(field(a, column), field(b, column)).unwrap_or(Ordering::Equal);
                    match direction {
                        Direction::Asc => ord,
                        Direction::Desc => ord.reverse(),
                    }
                });
            }
        }
        rows
    }

    fn selected(&self, query: &Query) -> Vec<Row> {
        let offset = query.offset_value().unwrap_or(0) as usize;
        let limit = query.limit_value().map_or(usize::MAX, |l| l as usize);
        self.filtered(query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect()
    }

    fn column_values(&self, query: &Query, column: &str) -> Vec<Value> {
        self.selected(query)
            .iter()
            .map(|row| field(row, column).clone())
            .filter(|v| !v.is_null())
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn get(&self, query: &Query, columns: &[String]) -> ExecutorResult<Vec<Row>> {
        self.enter("get").await?;
        Ok(self
            .selected(query)
            .iter()
            .map(|row| project(row, columns))
            .collect())
    }

    async fn first(&self, query: &Query, columns: &[String]) -> ExecutorResult<Option<Row>> {
        self.enter("first").await?;
        Ok(self.selected(query).first().map(|row| project(row, columns)))
    }

    async fn find(
        &self,
        query: &Query,
        id: &Value,
        columns: &[String],
    ) -> ExecutorResult<Option<Row>> {
        self.enter("find").await?;
        Ok(self
            .selected(query)
            .iter()
            .find(|row| values_equal(field(row, "id"), id))
            .map(|row| project(row, columns)))
    }

    async fn count(&self, query: &Query, _columns: &[String]) -> ExecutorResult<u64> {
        self.enter("count").await?;
        Ok(self.selected(query).len() as u64)
    }

    async fn sum(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>> {
        self.enter("sum").await?;
        let values = self.column_values(query, column);
        if values.iter().all(Value::is_i64) {
            let total: i64 = values.iter().filter_map(Value::as_i64).sum();
            return Ok(Some(json!(total)));
        }
        let total: f64 = values.iter().filter_map(Value::as_f64).sum();
        Ok(Some(json!(total)))
    }

    async fn avg(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>> {
        self.enter("avg").await?;
        let values: Vec<f64> = self
            .column_values(query, column)
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(json!(values.iter().sum::<f64>() / values.len() as f64)))
    }

    async fn min(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>> {
        self.enter("min").await?;
        Ok(self
            .column_values(query, column)
            .into_iter()
            .min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal)))
    }

    async fn max(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>> {
        self.enter("max").await?;
        Ok(self
            .column_values(query, column)
            .into_iter()
            .max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal)))
    }

    async fn pluck(
        &self,
        query: &Query,
        column: &str,
        key: Option<&str>,
    ) -> ExecutorResult<Pluck> {
        self.enter("pluck").await?;
        let rows = self.selected(query);
        Ok(match key {
            Some(key) => Pluck::Keyed(
                rows.iter()
                    .map(|row| (field(row, key).clone(), field(row, column).clone()))
                    .collect(),
            ),
            None => Pluck::Values(rows.iter().map(|row| field(row, column).clone()).collect()),
        })
    }

    async fn paginate(
        &self,
        query: &Query,
        per_page: u64,
        columns: &[String],
        page_name: &str,
        page: u64,
    ) -> ExecutorResult<Page> {
        self.enter("paginate").await?;
        let rows = self.filtered(query);
        let skip = page.saturating_sub(1).saturating_mul(per_page) as usize;
        Ok(Page {
            total: rows.len() as u64,
            data: rows
                .iter()
                .skip(skip)
                .take(per_page as usize)
                .map(|row| project(row, columns))
                .collect(),
            per_page,
            current_page: page,
            page_name: page_name.to_string(),
        })
    }

    async fn value(&self, query: &Query, column: &str) -> ExecutorResult<Option<Value>> {
        self.enter("value").await?;
        Ok(self
            .selected(query)
            .first()
            .map(|row| field(row, column).clone()))
    }

    async fn insert(&self, query: &Query, values: &[Row]) -> ExecutorResult<bool> {
        self.enter("insert").await?;
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(query.table_name().to_string())
            .or_default()
            .extend(values.iter().cloned());
        Ok(true)
    }

    async fn update(&self, query: &Query, values: &Row) -> ExecutorResult<u64> {
        self.enter("update").await?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;
        for row in tables.entry(query.table_name().to_string()).or_default() {
            if matches(row, query.wheres()) {
                for (column, value) in values {
                    row.insert(column.clone(), value.clone());
                }
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete(&self, query: &Query) -> ExecutorResult<u64> {
        self.enter("delete").await?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables.entry(query.table_name().to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| !matches(row, query.wheres()));
        Ok((before - rows.len()) as u64)
    }
}

static NULL: Value = Value::Null;

fn field<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.iter().any(|c| c == "*") || columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn matches(row: &Row, predicates: &[Predicate]) -> bool {
    let mut result = true;
    for (i, predicate) in predicates.iter().enumerate() {
        let hit = condition_matches(row, &predicate.condition);
        result = match (i, predicate.boolean) {
            (0, _) => hit,
            (_, sift_core::Boolean::And) => result && hit,
            (_, sift_core::Boolean::Or) => result || hit,
        };
    }
    result
}

fn condition_matches(row: &Row, condition: &Condition) -> bool {
    match condition {
        Condition::Basic {
            column,
            operator,
            value,
        } => apply(field(row, column), *operator, value),
        Condition::In {
            column,
            values,
            negated,
        } => values.iter().any(|v| values_equal(field(row, column), v)) != *negated,
        Condition::Null { column, negated } => field(row, column).is_null() != *negated,
        Condition::Between {
            column,
            low,
            high,
            negated,
        } => {
            let value = field(row, column);
            let inside = matches!(compare(value, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(value, high), Some(Ordering::Less | Ordering::Equal));
            inside != *negated
        }
        Condition::Column {
            first,
            operator,
            second,
        } => apply(field(row, first), *operator, field(row, second)),
        Condition::Nested(inner) => matches(row, inner),
        Condition::Raw { .. } => true,
    }
}

fn apply(left: &Value, operator: Operator, right: &Value) -> bool {
    let ord = compare(left, right);
    match operator {
        Operator::Eq => values_equal(left, right),
        Operator::NotEq => !values_equal(left, right),
        Operator::Lt => ord == Some(Ordering::Less),
        Operator::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => ord == Some(Ordering::Greater),
        Operator::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        Operator::Like => like(left, right),
        Operator::NotLike => !like(left, right),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    left == right || compare(left, right) == Some(Ordering::Equal)
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL `LIKE` with `%` wildcards only.
fn like(value: &Value, pattern: &Value) -> bool {
    let (Some(value), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
        return false;
    };
    let parts: Vec<&str> = pattern.split('%').collect();
    let mut rest = value;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(at) => rest = &rest[at + part.len()..],
                None => return false,
            }
        }
    }
    rest.is_empty()
}

/// Build a row from `(column, value)` pairs.
pub fn row<I, K, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        Self::at(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or_default())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("advance within chrono range");
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::collection::vec;
    use proptest::option;
    use proptest::prelude::*;

    /// Lowercase identifiers. No `_`, so column lists and predicate
    /// segments of different queries cannot run together.
    pub fn arb_identifier() -> impl Strategy<Value = String> {
        "[a-z]{1,8}"
    }

    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _%-]{0,12}".prop_map(Value::from),
        ]
    }

    pub fn arb_operator() -> impl Strategy<Value = Operator> {
        prop_oneof![
            Just(Operator::Eq),
            Just(Operator::NotEq),
            Just(Operator::Lt),
            Just(Operator::Lte),
            Just(Operator::Gt),
            Just(Operator::Gte),
            Just(Operator::Like),
            Just(Operator::NotLike),
        ]
    }

    pub fn arb_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Asc), Just(Direction::Desc)]
    }

    /// One query-building step, applied through the public builder.
    #[derive(Debug, Clone)]
    pub enum WhereStep {
        Op(String, Operator, Value),
        Or(String, Operator, Value),
        In(String, Vec<Value>),
        NotIn(String, Vec<Value>),
        Null(String),
        NotNull(String),
        Between(String, Value, Value),
        Column(String, Operator, String),
    }

    impl WhereStep {
        pub fn apply(self, query: Query) -> Query {
            match self {
                WhereStep::Op(c, op, v) => query.where_op(c, op, v),
                WhereStep::Or(c, op, v) => query.or_where(c, op, v),
                WhereStep::In(c, vs) => query.where_in(c, vs),
                WhereStep::NotIn(c, vs) => query.where_not_in(c, vs),
                WhereStep::Null(c) => query.where_null(c),
                WhereStep::NotNull(c) => query.where_not_null(c),
                WhereStep::Between(c, lo, hi) => query.where_between(c, lo, hi),
                WhereStep::Column(a, op, b) => query.where_column(a, op, b),
            }
        }
    }

    pub fn arb_where_step() -> impl Strategy<Value = WhereStep> {
        prop_oneof![
            (arb_identifier(), arb_operator(), arb_value()).prop_map(|(c, o, v)| WhereStep::Op(c, o, v)),
            (arb_identifier(), arb_operator(), arb_value()).prop_map(|(c, o, v)| WhereStep::Or(c, o, v)),
            (arb_identifier(), vec(arb_value(), 0..4)).prop_map(|(c, vs)| WhereStep::In(c, vs)),
            (arb_identifier(), vec(arb_value(), 0..4)).prop_map(|(c, vs)| WhereStep::NotIn(c, vs)),
            arb_identifier().prop_map(WhereStep::Null),
            arb_identifier().prop_map(WhereStep::NotNull),
            (arb_identifier(), arb_value(), arb_value())
                .prop_map(|(c, lo, hi)| WhereStep::Between(c, lo, hi)),
            (arb_identifier(), arb_operator(), arb_identifier())
                .prop_map(|(a, o, b)| WhereStep::Column(a, o, b)),
        ]
    }

    /// Queries against `table` with predicates, at most one ordering and an
    /// optional limit window. No locks, random ordering or eager loads.
    pub fn arb_query_on(table: String) -> impl Strategy<Value = Query> {
        (
            vec(arb_where_step(), 0..4),
            option::of((arb_identifier(), arb_direction())),
            option::of(1u64..100),
            option::of(0u64..100),
        )
            .prop_map(move |(steps, order, limit, offset)| {
                let mut query = Query::table(table.clone());
                for step in steps {
                    query = step.apply(query);
                }
                if let Some((column, direction)) = order {
                    query = query.order_by(column, direction);
                }
                if let Some(limit) = limit {
                    query = query.limit(limit);
                }
                if let Some(offset) = offset {
                    query = query.offset(offset);
                }
                query
            })
    }

    pub fn arb_query() -> impl Strategy<Value = Query> {
        arb_identifier().prop_flat_map(arb_query_on)
    }

    pub fn arb_columns() -> impl Strategy<Value = Vec<String>> {
        prop_oneof![Just(all_columns()), vec(arb_identifier(), 1..3)]
    }

    /// Read operations. `find` ids are non-negative integers.
    pub fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            arb_columns().prop_map(|columns| Operation::Get { columns }),
            arb_columns().prop_map(|columns| Operation::First { columns }),
            (0u64..10_000, arb_columns())
                .prop_map(|(id, columns)| Operation::Find { id: id.into(), columns }),
            arb_columns().prop_map(|columns| Operation::Count { columns }),
            arb_identifier().prop_map(|column| Operation::Sum { column }),
            arb_identifier().prop_map(|column| Operation::Avg { column }),
            arb_identifier().prop_map(|column| Operation::Min { column }),
            arb_identifier().prop_map(|column| Operation::Max { column }),
            (arb_identifier(), option::of(arb_identifier()))
                .prop_map(|(column, key)| Operation::Pluck { column, key }),
            (1u64..50, arb_columns(), arb_identifier(), 1u64..20).prop_map(
                |(per_page, columns, page_name, page)| Operation::Paginate {
                    per_page,
                    columns,
                    page_name,
                    page,
                }
            ),
            arb_identifier().prop_map(|column| Operation::Value { column }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> MockExecutor {
        let executor = MockExecutor::new();
        executor.seed(
            "users",
            vec![
                row([("id", json!(1)), ("name", json!("ada")), ("age", json!(36))]),
                row([("id", json!(2)), ("name", json!("bob")), ("age", json!(25))]),
                row([("id", json!(3)), ("name", json!("cy")), ("age", Value::Null)]),
            ],
        );
        executor
    }

    #[tokio::test]
    async fn test_filters_and_orders() {
        let executor = users();
        let query = Query::table("users")
            .where_not_null("age")
            .order_by("age", Direction::Asc);
        let rows = executor.get(&query, &all_columns()).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("bob"), json!("ada")]);
        assert_eq!(executor.calls("get"), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_touch_matching_rows() {
        let executor = users();
        let query = Query::table("users").where_eq("id", 2);

        let changed = executor
            .update(&query, &row([("name", "robert")]))
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let found = executor.find(&Query::table("users"), &json!(2), &all_columns()).await.unwrap();
        assert_eq!(found.unwrap()["name"], json!("robert"));

        assert_eq!(executor.delete(&query).await.unwrap(), 1);
        assert_eq!(executor.rows("users").len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let executor = users();
        let err = ExecutorError::ConnectionFailed {
            reason: "gone".to_string(),
        };
        executor.fail_with(err.clone());
        assert_eq!(
            executor.count(&Query::table("users"), &all_columns()).await,
            Err(err)
        );
        executor.recover();
        assert_eq!(
            executor.count(&Query::table("users"), &all_columns()).await,
            Ok(3)
        );
    }

    #[test]
    fn test_like_patterns() {
        assert!(like(&json!("alice"), &json!("a%")));
        assert!(like(&json!("alice"), &json!("%ice")));
        assert!(like(&json!("alice"), &json!("%li%")));
        assert!(!like(&json!("alice"), &json!("b%")));
        assert!(like(&json!("bob"), &json!("bob")));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
    }
}
