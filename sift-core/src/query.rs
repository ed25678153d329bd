//! Query builder state.
//!
//! A [`Query`] records everything that shapes the rows a read returns:
//! the table, predicates in the order they were applied, ordering,
//! pagination window, eager-loaded relations and row locks. It carries no
//! behavior beyond building itself up; key and tag derivation live in
//! `sift-cache`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// PREDICATES
// ============================================================================

/// How a predicate joins the ones applied before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub fn as_str(&self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

/// Comparison operator for basic and column predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
}

impl Operator {
    /// Word form used inside cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::NotEq => "neq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Like => "like",
            Operator::NotLike => "notlike",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single WHERE condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `column <op> value`
    Basic {
        column: String,
        operator: Operator,
        value: Value,
    },
    /// `column [NOT] IN (values...)`
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column IS [NOT] NULL`
    Null { column: String, negated: bool },
    /// `column [NOT] BETWEEN low AND high`
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    /// `first <op> second`, both columns
    Column {
        first: String,
        operator: Operator,
        second: String,
    },
    /// Parenthesised group of predicates.
    Nested(Vec<Predicate>),
    /// Raw SQL fragment with positional bindings.
    Raw { sql: String, bindings: Vec<Value> },
}

/// A condition together with the boolean joining it to its predecessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub boolean: Boolean,
    pub condition: Condition,
}

// ============================================================================
// ORDERING, RELATIONS, LOCKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Column { column: String, direction: Direction },
    /// Non-deterministic ordering; such queries are never cached.
    Random,
    Raw { sql: String },
}

/// A relation marked for eager loading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Relation name as declared on the model.
    pub name: String,
    /// Table of the related model.
    pub table: String,
    /// Whether the related model participates in caching.
    pub cachable: bool,
}

impl Relation {
    /// A cachable relation.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            cachable: true,
        }
    }

    /// A relation whose model opted out of caching.
    pub fn uncachable(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            cachable: false,
            ..Self::new(name, table)
        }
    }
}

/// Row lock requested by the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    Shared,
    ForUpdate,
}

// ============================================================================
// QUERY
// ============================================================================

/// Builder state for a single-table query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    table: String,
    wheres: Vec<Predicate>,
    orders: Vec<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    eager_loads: Vec<Relation>,
    lock: Option<LockMode>,
}

impl Query {
    /// Start a query against `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            eager_loads: Vec::new(),
            lock: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn wheres(&self) -> &[Predicate] {
        &self.wheres
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn eager_loads(&self) -> &[Relation] {
        &self.eager_loads
    }

    pub fn lock_mode(&self) -> Option<LockMode> {
        self.lock
    }

    /// Returns true if any ordering is random.
    pub fn has_random_order(&self) -> bool {
        self.orders.iter().any(|o| matches!(o, Order::Random))
    }

    fn push(mut self, boolean: Boolean, condition: Condition) -> Self {
        self.wheres.push(Predicate { boolean, condition });
        self
    }

    /// `AND column = value`
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    /// `AND column <op> value`
    pub fn where_op(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.push(
            Boolean::And,
            Condition::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
        )
    }

    /// `OR column <op> value`
    pub fn or_where(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.push(
            Boolean::Or,
            Condition::Basic {
                column: column.into(),
                operator,
                value: value.into(),
            },
        )
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(
            Boolean::And,
            Condition::In {
                column: column.into(),
                values: values.into_iter().map(Into::into).collect(),
                negated: false,
            },
        )
    }

    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(
            Boolean::And,
            Condition::In {
                column: column.into(),
                values: values.into_iter().map(Into::into).collect(),
                negated: true,
            },
        )
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push(
            Boolean::And,
            Condition::Null {
                column: column.into(),
                negated: false,
            },
        )
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push(
            Boolean::And,
            Condition::Null {
                column: column.into(),
                negated: true,
            },
        )
    }

    pub fn where_between(
        self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.push(
            Boolean::And,
            Condition::Between {
                column: column.into(),
                low: low.into(),
                high: high.into(),
                negated: false,
            },
        )
    }

    pub fn where_column(
        self,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.push(
            Boolean::And,
            Condition::Column {
                first: first.into(),
                operator,
                second: second.into(),
            },
        )
    }

    /// `AND ( ... )` where the group is built by `build` on an empty query
    /// against the same table.
    pub fn where_nested(self, build: impl FnOnce(Query) -> Query) -> Self {
        let group = build(Query::table(self.table.clone()));
        self.push(Boolean::And, Condition::Nested(group.wheres))
    }

    pub fn where_raw<I, V>(self, sql: impl Into<String>, bindings: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(
            Boolean::And,
            Condition::Raw {
                sql: sql.into(),
                bindings: bindings.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order::Column {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn order_by_raw(mut self, sql: impl Into<String>) -> Self {
        self.orders.push(Order::Raw { sql: sql.into() });
        self
    }

    pub fn in_random_order(mut self) -> Self {
        self.orders.push(Order::Random);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Mark a relation for eager loading.
    pub fn with(mut self, relation: Relation) -> Self {
        if !self.eager_loads.iter().any(|r| r.name == relation.name) {
            self.eager_loads.push(relation);
        }
        self
    }

    pub fn lock_for_update(mut self) -> Self {
        self.lock = Some(LockMode::ForUpdate);
        self
    }

    pub fn shared_lock(mut self) -> Self {
        self.lock = Some(LockMode::Shared);
        self
    }
}
