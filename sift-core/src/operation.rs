//! Read operations and their cache-relevant shape.
//!
//! An [`Operation`] names what a read does and carries the arguments it
//! was called with. The retrieval path dispatches on it to reach the
//! matching executor method on a cache miss, and derives the
//! [`QueryShape`] (columns plus discriminator) from it for key building.

use serde_json::Value;
use std::fmt;

/// The wildcard column list.
pub fn all_columns() -> Vec<String> {
    vec!["*".to_string()]
}

/// Read operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    First,
    Find,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Pluck,
    Paginate,
    Value,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "get",
            OperationKind::First => "first",
            OperationKind::Find => "find",
            OperationKind::Count => "count",
            OperationKind::Sum => "sum",
            OperationKind::Avg => "avg",
            OperationKind::Min => "min",
            OperationKind::Max => "max",
            OperationKind::Pluck => "pluck",
            OperationKind::Paginate => "paginate",
            OperationKind::Value => "value",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A read call with its original arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Get {
        columns: Vec<String>,
    },
    First {
        columns: Vec<String>,
    },
    Find {
        id: Value,
        columns: Vec<String>,
    },
    Count {
        columns: Vec<String>,
    },
    Sum {
        column: String,
    },
    Avg {
        column: String,
    },
    Min {
        column: String,
    },
    Max {
        column: String,
    },
    Pluck {
        column: String,
        key: Option<String>,
    },
    Paginate {
        per_page: u64,
        columns: Vec<String>,
        page_name: String,
        page: u64,
    },
    Value {
        column: String,
    },
}

/// The parts of a read that, together with the query state, identify its
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryShape {
    pub kind: OperationKind,
    pub columns: Vec<String>,
    pub discriminator: String,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Get { .. } => OperationKind::Get,
            Operation::First { .. } => OperationKind::First,
            Operation::Find { .. } => OperationKind::Find,
            Operation::Count { .. } => OperationKind::Count,
            Operation::Sum { .. } => OperationKind::Sum,
            Operation::Avg { .. } => OperationKind::Avg,
            Operation::Min { .. } => OperationKind::Min,
            Operation::Max { .. } => OperationKind::Max,
            Operation::Pluck { .. } => OperationKind::Pluck,
            Operation::Paginate { .. } => OperationKind::Paginate,
            Operation::Value { .. } => OperationKind::Value,
        }
    }

    /// Columns contributing to the key. Aggregates and `value` key on `*`
    /// and carry their column in the discriminator instead.
    pub fn columns(&self) -> Vec<String> {
        match self {
            Operation::Get { columns }
            | Operation::First { columns }
            | Operation::Find { columns, .. }
            | Operation::Count { columns }
            | Operation::Paginate { columns, .. } => columns.clone(),
            Operation::Pluck { column, .. } => vec![column.clone()],
            Operation::Sum { .. }
            | Operation::Avg { .. }
            | Operation::Min { .. }
            | Operation::Max { .. }
            | Operation::Value { .. } => all_columns(),
        }
    }

    /// Operation-specific key suffix, e.g. `-find_42` or `-sum_"price"`.
    ///
    /// Column and page names are JSON-encoded, so `sum("a_b")` and a pluck
    /// of `"a"` keyed by `"b"` never share a suffix.
    pub fn discriminator(&self) -> String {
        match self {
            Operation::Get { .. } => String::new(),
            Operation::First { .. } => "-first".to_string(),
            Operation::Find { id, .. } => format!("-find_{}", scalar_segment(id)),
            Operation::Count { .. } => "-count".to_string(),
            Operation::Sum { column } => format!("-sum_{}", ident(column)),
            Operation::Avg { column } => format!("-avg_{}", ident(column)),
            Operation::Min { column } => format!("-min_{}", ident(column)),
            Operation::Max { column } => format!("-max_{}", ident(column)),
            Operation::Pluck { column, key } => match key {
                Some(key) => format!("-pluck_{}_{}", ident(column), ident(key)),
                None => format!("-pluck_{}", ident(column)),
            },
            Operation::Paginate {
                per_page,
                page_name,
                page,
                ..
            } => format!("-paginate_by_{}_{}_{}", per_page, ident(page_name), page),
            Operation::Value { column } => format!("-value_{}", ident(column)),
        }
    }

    pub fn shape(&self) -> QueryShape {
        QueryShape {
            kind: self.kind(),
            columns: self.columns(),
            discriminator: self.discriminator(),
        }
    }
}

fn ident(name: &str) -> String {
    Value::String(name.to_string()).to_string()
}

/// Render a scalar the way it reads in a key: strings bare, everything else
/// as JSON.
pub fn scalar_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discriminators() {
        let find = Operation::Find {
            id: json!(42),
            columns: all_columns(),
        };
        assert_eq!(find.discriminator(), "-find_42");

        let sum = Operation::Sum {
            column: "price".to_string(),
        };
        assert_eq!(sum.discriminator(), r#"-sum_"price""#);
        assert_eq!(sum.columns(), all_columns());

        let pluck = Operation::Pluck {
            column: "name".to_string(),
            key: Some("id".to_string()),
        };
        assert_eq!(pluck.discriminator(), r#"-pluck_"name"_"id""#);
        assert_eq!(pluck.columns(), vec!["name".to_string()]);

        let page = Operation::Paginate {
            per_page: 15,
            columns: all_columns(),
            page_name: "page".to_string(),
            page: 3,
        };
        assert_eq!(page.discriminator(), r#"-paginate_by_15_"page"_3"#);

        assert_eq!(Operation::Get { columns: all_columns() }.discriminator(), "");
    }

    #[test]
    fn test_identifiers_do_not_run_together() {
        let keyed = Operation::Pluck {
            column: "a".to_string(),
            key: Some("b".to_string()),
        };
        let plain = Operation::Pluck {
            column: "a_b".to_string(),
            key: None,
        };
        assert_ne!(keyed.discriminator(), plain.discriminator());
    }

    #[test]
    fn test_shape_carries_kind() {
        let op = Operation::Count {
            columns: all_columns(),
        };
        let shape = op.shape();
        assert_eq!(shape.kind, OperationKind::Count);
        assert_eq!(shape.discriminator, "-count");
    }
}
