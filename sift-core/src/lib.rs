//! SIFT Core - Query Model and Shared Types
//!
//! Pure data structures and collaborator traits shared by the cache layer
//! and its test utilities: the query builder state, read operations, result
//! types, the executor and clock interfaces, configuration and errors.

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod operation;
pub mod output;
pub mod query;

pub use clock::{Clock, SystemClock};
pub use config::{CacheConfig, DEFAULT_PER_PAGE};
pub use error::{
    BackendError, CacheError, ConfigError, ExecutorError, ExecutorResult, SiftError, SiftResult,
};
pub use executor::{dispatch, QueryExecutor};
pub use operation::{all_columns, scalar_segment, Operation, OperationKind, QueryShape};
pub use output::{Page, Pluck, QueryOutput, Row};
pub use query::{
    Boolean, Condition, Direction, LockMode, Operator, Order, Predicate, Query, Relation,
};
