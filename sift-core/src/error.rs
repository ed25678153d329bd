//! Error types for SIFT operations

use thiserror::Error;

/// Failures raised by the underlying query executor.
///
/// The cache layer never inspects or retries these; they reach the caller
/// exactly as the executor produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Query failed on {table}: {reason}")]
    QueryFailed { table: String, reason: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Failures raised by the cache store or the cooldown store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization error: {reason}")]
    Deserialization { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Logic errors detected by the caching protocol itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Hash collision repair failed for {key}: slot still holds {found}")]
    CollisionRepairFailed { key: String, found: String },

    #[error("Cached output for {operation} has unexpected kind {found}")]
    UnexpectedOutput {
        operation: &'static str,
        found: &'static str,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all SIFT errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SiftError {
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SiftError {
    /// Returns true when the failure came from the cache store.
    pub fn is_backend(&self) -> bool {
        matches!(self, SiftError::Backend(_))
    }
}

/// Result type alias for SIFT operations.
pub type SiftResult<T> = Result<T, SiftError>;

/// Result type alias for executor calls.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::QueryFailed {
            table: "users".to_string(),
            reason: "syntax error".to_string(),
        };
        assert_eq!(format!("{}", err), "Query failed on users: syntax error");
    }

    #[test]
    fn test_from_conversions_preserve_inner_error() {
        let inner = ExecutorError::ConnectionFailed {
            reason: "refused".to_string(),
        };
        let err: SiftError = inner.clone().into();
        assert_eq!(err, SiftError::Executor(inner));
        assert!(!err.is_backend());

        let err: SiftError = BackendError::LockPoisoned.into();
        assert!(err.is_backend());
    }

    #[test]
    fn test_collision_error_mentions_both_keys() {
        let err = CacheError::CollisionRepairFailed {
            key: "users-find_1".to_string(),
            found: "posts-find_1".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("users-find_1"));
        assert!(msg.contains("posts-find_1"));
    }
}
