// Deployment configuration for sieve

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// What happens to an entity whose virtual field cannot be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Propagate immediately and abort the request
    Throw,
    /// Substitute the field's default value and continue
    #[default]
    Default,
    /// Drop the entity from the result set and continue
    Exclude,
}

impl FailurePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "throw" => Some(FailurePolicy::Throw),
            "default" => Some(FailurePolicy::Default),
            "exclude" => Some(FailurePolicy::Exclude),
            _ => None,
        }
    }
}

/// Request filter parsing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Fail the whole request on the first invalid clause instead of dropping it
    pub strict: bool,
    /// Accepted datetime formats, tried in order. `rfc3339` is reserved.
    pub datetime_formats: Vec<String>,
    pub true_tokens: Vec<String>,
    pub false_tokens: Vec<String>,
    /// Fields that may never be filtered on
    pub blocked_fields: Vec<String>,
    /// Maximum number of values in an `in` list
    pub max_in_values: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            strict: false,
            datetime_formats: vec![
                "rfc3339".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%d".to_string(),
            ],
            true_tokens: vec!["true".into(), "1".into(), "yes".into(), "on".into()],
            false_tokens: vec!["false".into(), "0".into(), "no".into(), "off".into()],
            blocked_fields: Vec::new(),
            max_in_values: 100,
        }
    }
}

/// Virtual field computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputationConfig {
    pub failure_policy: FailurePolicy,
    /// Entities per chunk
    pub batch_size: usize,
    /// One failing entity aborts the whole batch instead of being skipped and logged
    pub abort_batch_on_failure: bool,
    /// Soft time ceiling per batch, checked between entities
    pub time_limit_ms: u64,
    /// Soft ceiling on the estimated size of computed values per batch
    pub memory_limit_bytes: usize,
    /// Compute chunks on the rayon pool
    pub parallel_chunks: bool,
}

impl Default for ComputationConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Default,
            batch_size: 100,
            abort_batch_on_failure: false,
            time_limit_ms: 5_000,
            memory_limit_bytes: 64 * 1024 * 1024,
            parallel_chunks: false,
        }
    }
}

impl ComputationConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

/// In-memory sorting by virtual fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConfig {
    pub max_sort_records: usize,
    /// Fall back to the store's default ordering when a virtual sort is infeasible
    pub fallback_enabled: bool,
    pub cache_sorted_ids: bool,
    pub sort_cache_ttl_secs: u64,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_sort_records: 10_000,
            fallback_enabled: true,
            cache_sorted_ids: true,
            sort_cache_ttl_secs: 300,
        }
    }
}

impl SortConfig {
    pub fn sort_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.sort_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub default_per_page: usize,
    pub max_per_page: usize,
    /// Path used to build navigation links
    pub base_path: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: 15,
            max_per_page: 100,
            base_path: "/".to_string(),
        }
    }
}

/// Computed-value cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 3600,
            max_entries: 100_000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SieveConfig {
    pub filter: FilterConfig,
    pub computation: ComputationConfig,
    pub sort: SortConfig,
    pub pagination: PaginationConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl SieveConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path, e)))?;
        Self::from_str(&content)
    }

    /// Parse configuration, trying JSON, then TOML, then YAML
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config = if let Ok(config) = serde_json::from_str::<SieveConfig>(content) {
            config
        } else if let Ok(config) = toml::from_str::<SieveConfig>(content) {
            config
        } else {
            serde_yaml::from_str::<SieveConfig>(content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Overlay `SIEVE_*` environment variables on top of this configuration
    pub fn with_env(mut self) -> Self {
        self.apply_env(|key| std::env::var(key).ok());
        self
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(strict) = lookup("SIEVE_STRICT").and_then(|v| parse_flag(&v)) {
            self.filter.strict = strict;
        }
        if let Some(policy) = lookup("SIEVE_FAILURE_POLICY").and_then(|v| FailurePolicy::parse(&v)) {
            self.computation.failure_policy = policy;
        }
        if let Some(size) = lookup("SIEVE_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.computation.batch_size = size;
        }
        if let Some(max) = lookup("SIEVE_MAX_SORT_RECORDS").and_then(|v| v.parse().ok()) {
            self.sort.max_sort_records = max;
        }
        if let Some(fallback) = lookup("SIEVE_SORT_FALLBACK").and_then(|v| parse_flag(&v)) {
            self.sort.fallback_enabled = fallback;
        }
        if let Some(level) = lookup("SIEVE_LOG_LEVEL") {
            self.logging.level = level;
        }
        debug!(
            "Effective configuration: strict={}, policy={:?}, batch_size={}, max_sort_records={}",
            self.filter.strict,
            self.computation.failure_policy,
            self.computation.batch_size,
            self.sort.max_sort_records
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.computation.batch_size == 0 {
            return Err(ConfigError::Validation(
                "computation.batch_size must be > 0".to_string(),
            ));
        }
        if self.computation.time_limit_ms == 0 {
            return Err(ConfigError::Validation(
                "computation.time_limit_ms must be > 0".to_string(),
            ));
        }
        if self.computation.memory_limit_bytes == 0 {
            return Err(ConfigError::Validation(
                "computation.memory_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.pagination.default_per_page == 0 || self.pagination.max_per_page == 0 {
            return Err(ConfigError::Validation(
                "pagination per-page limits must be > 0".to_string(),
            ));
        }
        if self.pagination.default_per_page > self.pagination.max_per_page {
            return Err(ConfigError::Validation(
                "pagination.default_per_page cannot exceed max_per_page".to_string(),
            ));
        }
        if self.filter.datetime_formats.is_empty() {
            return Err(ConfigError::Validation(
                "filter.datetime_formats cannot be empty".to_string(),
            ));
        }
        let truthy: BTreeSet<String> = self.filter.true_tokens.iter().map(|t| t.to_lowercase()).collect();
        if let Some(token) = self
            .filter
            .false_tokens
            .iter()
            .find(|t| truthy.contains(&t.to_lowercase()))
        {
            return Err(ConfigError::Validation(format!(
                "boolean token '{}' is both true and false",
                token
            )));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = SieveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.computation.failure_policy, FailurePolicy::Default);
        assert!(config.sort.fallback_enabled);
    }

    #[test]
    fn test_from_toml() {
        let config = SieveConfig::from_str(
            r#"
            [filter]
            strict = true

            [computation]
            failure_policy = "exclude"
            batch_size = 25

            [sort]
            max_sort_records = 500
            fallback_enabled = false
            "#,
        )
        .unwrap();

        assert!(config.filter.strict);
        assert_eq!(config.computation.failure_policy, FailurePolicy::Exclude);
        assert_eq!(config.computation.batch_size, 25);
        assert_eq!(config.sort.max_sort_records, 500);
        assert!(!config.sort.fallback_enabled);
        assert_eq!(config.pagination.default_per_page, 15);
    }

    #[test]
    fn test_from_json_and_yaml() {
        let json = SieveConfig::from_str(r#"{"computation": {"failure_policy": "throw"}}"#).unwrap();
        assert_eq!(json.computation.failure_policy, FailurePolicy::Throw);

        let yaml = SieveConfig::from_str("pagination:\n  default_per_page: 5\n").unwrap();
        assert_eq!(yaml.pagination.default_per_page, 5);
    }

    #[test]
    fn test_unknown_keys_fail_closed() {
        let err = SieveConfig::from_str("[computation]\nbatch = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SieveConfig::default();
        config.computation.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SieveConfig::default();
        config.filter.false_tokens.push("YES".to_string());
        assert!(config.validate().is_err());

        let mut config = SieveConfig::default();
        config.pagination.default_per_page = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("SIEVE_STRICT", "true"),
            ("SIEVE_FAILURE_POLICY", "exclude"),
            ("SIEVE_BATCH_SIZE", "7"),
            ("SIEVE_SORT_FALLBACK", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = SieveConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert!(config.filter.strict);
        assert_eq!(config.computation.failure_policy, FailurePolicy::Exclude);
        assert_eq!(config.computation.batch_size, 7);
        assert!(!config.sort.fallback_enabled);
    }
}
