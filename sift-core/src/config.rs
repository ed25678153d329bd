//! Cache configuration.
//!
//! Values come from defaults, environment variables, or explicit `with_*`
//! setters. Process wiring decides which; the cache only consumes the
//! resulting [`CacheConfig`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;

/// Default page size when `paginate` is called without one.
pub const DEFAULT_PER_PAGE: u64 = 15;

/// Configuration for the query cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch. When false every read goes straight to the executor.
    pub enabled: bool,

    /// Prepended to every key and tag. Use it to separate connections or
    /// deployments sharing one cache store.
    pub prefix: String,

    /// Cooldown window applied to tables without an override.
    /// `None` flushes on every write.
    pub cooldown: Option<Duration>,

    /// Per-table cooldown windows, keyed by unprefixed table name.
    pub table_cooldowns: HashMap<String, Duration>,

    /// Page size used when `paginate` gets none.
    pub default_per_page: u64,

    /// On a cache store failure during a read, log it and run the query
    /// directly instead of failing the read.
    pub bypass_on_backend_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: String::new(),
            cooldown: None,
            table_cooldowns: HashMap::new(),
            default_per_page: DEFAULT_PER_PAGE,
            bypass_on_backend_error: false,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SIFT_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `SIFT_CACHE_PREFIX`: key and tag prefix (default: empty)
    /// - `SIFT_CACHE_COOLDOWN_SECS`: default cooldown window, 0 disables (default: unset)
    /// - `SIFT_CACHE_DEFAULT_PER_PAGE`: page size for `paginate` (default: 15)
    /// - `SIFT_CACHE_BYPASS_ON_BACKEND_ERROR`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        let enabled = std::env::var("SIFT_CACHE_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let prefix = std::env::var("SIFT_CACHE_PREFIX").unwrap_or_default();

        let cooldown = std::env::var("SIFT_CACHE_COOLDOWN_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let default_per_page = std::env::var("SIFT_CACHE_DEFAULT_PER_PAGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PER_PAGE);

        let bypass_on_backend_error = std::env::var("SIFT_CACHE_BYPASS_ON_BACKEND_ERROR")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            enabled,
            prefix,
            cooldown,
            table_cooldowns: HashMap::new(),
            default_per_page,
            bypass_on_backend_error,
        }
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the key and tag prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the default cooldown window.
    pub fn with_cooldown(mut self, window: Duration) -> Self {
        self.cooldown = Some(window);
        self
    }

    /// Override the cooldown window for one table.
    pub fn with_table_cooldown(mut self, table: impl Into<String>, window: Duration) -> Self {
        self.table_cooldowns.insert(table.into(), window);
        self
    }

    /// Set the default page size.
    pub fn with_default_per_page(mut self, per_page: u64) -> Self {
        self.default_per_page = per_page;
        self
    }

    /// Enable or disable the executor fallback on store failures.
    pub fn with_bypass_on_backend_error(mut self, enabled: bool) -> Self {
        self.bypass_on_backend_error = enabled;
        self
    }

    /// Cooldown window for `table`: its override, else the default.
    pub fn cooldown_for(&self, table: &str) -> Option<Duration> {
        self.table_cooldowns
            .get(table)
            .copied()
            .or(self.cooldown)
            .filter(|w| !w.is_zero())
    }

    /// Check the configuration for values the cache cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_per_page == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_per_page".to_string(),
                value: "0".to_string(),
                reason: "page size must be positive".to_string(),
            });
        }
        if self.prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                field: "prefix".to_string(),
                value: self.prefix.clone(),
                reason: "prefix must not contain whitespace".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_enabled(false)
            .with_prefix("app:")
            .with_cooldown(Duration::from_secs(30))
            .with_table_cooldown("orders", Duration::from_secs(5))
            .with_default_per_page(50)
            .with_bypass_on_backend_error(true);

        assert!(!config.enabled);
        assert_eq!(config.prefix, "app:");
        assert_eq!(config.cooldown_for("orders"), Some(Duration::from_secs(5)));
        assert_eq!(config.cooldown_for("users"), Some(Duration::from_secs(30)));
        assert_eq!(config.default_per_page, 50);
        assert!(config.bypass_on_backend_error);
    }

    #[test]
    fn test_zero_cooldown_means_none() {
        let config = CacheConfig::new().with_table_cooldown("logs", Duration::ZERO);
        assert_eq!(config.cooldown_for("logs"), None);
        assert_eq!(config.cooldown_for("users"), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::new().with_default_per_page(0).validate().is_err());
        assert!(CacheConfig::new().with_prefix("a b").validate().is_err());
    }
}
