//! Environment-driven configuration
//!
//! Every component takes its own config struct at construction. This module
//! assembles all of them from `OUROBOROS_*` environment variables (a `.env`
//! file is honoured), falling back to the defaults for anything unset.
//!
//! | Variable | Field |
//! |---|---|
//! | `OUROBOROS_CACHE_DIR` | `cache.cache_dir` |
//! | `OUROBOROS_CACHE_MAX_SIZE_BYTES` | `cache.max_size_bytes` |
//! | `OUROBOROS_CACHE_DEFAULT_TTL_SECS` | `cache.default_ttl` |
//! | `OUROBOROS_CACHE_MEMORY_ITEM_LIMIT` | `cache.memory_item_limit` |
//! | `OUROBOROS_CACHE_TTL_JITTER` | `cache.ttl_jitter` |
//! | `OUROBOROS_CACHE_AUTO_CLEANUP` | `cache.enable_auto_cleanup` |
//! | `OUROBOROS_CACHE_CLEANUP_INTERVAL_SECS` | `cache.cleanup_interval` |
//! | `OUROBOROS_RETRY_MAX_RETRIES` | `retry.max_retries` |
//! | `OUROBOROS_RETRY_INITIAL_BACKOFF_MS` | `retry.initial_backoff` |
//! | `OUROBOROS_RETRY_MAX_BACKOFF_MS` | `retry.max_backoff` |
//! | `OUROBOROS_RETRY_MULTIPLIER` | `retry.backoff_multiplier` |
//! | `OUROBOROS_RETRY_JITTER` | `retry.jitter` |
//! | `OUROBOROS_RETRY_ATTEMPT_TIMEOUT_MS` | `retry.attempt_timeout` |
//! | `OUROBOROS_BREAKER_FAILURE_THRESHOLD` | `breaker.failure_threshold` |
//! | `OUROBOROS_BREAKER_COOLDOWN_MS` | `breaker.cooldown_duration` |
//! | `OUROBOROS_SHUTDOWN_TIMEOUT_MS` | `manager.shutdown_timeout` |

use crate::cache::CacheConfig;
use crate::client::ClientConfig;
use crate::error::{ResilienceError, Result};
use crate::lifecycle::ManagerConfig;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Configuration for every component in the crate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    pub manager: ManagerConfig,
}

impl ResilienceConfig {
    /// Load from the process environment, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut config = Self::default();

        if let Some(dir) = env.get("OUROBOROS_CACHE_DIR") {
            config.cache.cache_dir = PathBuf::from(dir);
        }
        if let Some(bytes) = env.parse("OUROBOROS_CACHE_MAX_SIZE_BYTES")? {
            config.cache.max_size_bytes = bytes;
        }
        if let Some(secs) = env.parse("OUROBOROS_CACHE_DEFAULT_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(limit) = env.parse("OUROBOROS_CACHE_MEMORY_ITEM_LIMIT")? {
            config.cache.memory_item_limit = limit;
        }
        if let Some(jitter) = env.parse("OUROBOROS_CACHE_TTL_JITTER")? {
            config.cache.ttl_jitter = jitter;
        }
        if let Some(enabled) = env.parse("OUROBOROS_CACHE_AUTO_CLEANUP")? {
            config.cache.enable_auto_cleanup = enabled;
        }
        if let Some(secs) = env.parse("OUROBOROS_CACHE_CLEANUP_INTERVAL_SECS")? {
            config.cache.cleanup_interval = Duration::from_secs(secs);
        }

        if let Some(retries) = env.parse("OUROBOROS_RETRY_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = env.parse("OUROBOROS_RETRY_INITIAL_BACKOFF_MS")? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse("OUROBOROS_RETRY_MAX_BACKOFF_MS")? {
            config.retry.max_backoff = Duration::from_millis(ms);
        }
        if let Some(multiplier) = env.parse("OUROBOROS_RETRY_MULTIPLIER")? {
            config.retry.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = env.parse("OUROBOROS_RETRY_JITTER")? {
            config.retry.jitter = jitter;
        }
        if let Some(ms) = env.parse::<u64>("OUROBOROS_RETRY_ATTEMPT_TIMEOUT_MS")? {
            // 0 disables the per-attempt bound
            config.retry.attempt_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        if let Some(threshold) = env.parse("OUROBOROS_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = threshold;
        }
        if let Some(ms) = env.parse("OUROBOROS_BREAKER_COOLDOWN_MS")? {
            config.breaker.cooldown_duration = Duration::from_millis(ms);
        }

        if let Some(ms) = env.parse("OUROBOROS_SHUTDOWN_TIMEOUT_MS")? {
            config.manager.shutdown_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        let sections = [
            ("cache", self.cache.validate()),
            ("retry", self.retry.validate()),
            ("breaker", self.breaker.validate()),
            ("manager", self.manager.validate()),
        ];

        for (section, result) in sections {
            result.map_err(|e| ResilienceError::ConfigError(format!("{}: {}", section, e)))?;
        }
        Ok(())
    }

    /// The per-client subset
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            manager: self.manager.clone(),
        }
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| ResilienceError::ConfigError(format!("invalid {}={:?}: {}", name, raw, e))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ResilienceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.breaker, CircuitBreakerConfig::default());
        assert_eq!(config.cache.default_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_overrides() {
        let config = ResilienceConfig::from_lookup(lookup(&[
            ("OUROBOROS_CACHE_DIR", "/tmp/frames"),
            ("OUROBOROS_CACHE_MAX_SIZE_BYTES", "2048"),
            ("OUROBOROS_CACHE_AUTO_CLEANUP", "false"),
            ("OUROBOROS_RETRY_MAX_RETRIES", "7"),
            ("OUROBOROS_RETRY_ATTEMPT_TIMEOUT_MS", "1500"),
            ("OUROBOROS_BREAKER_FAILURE_THRESHOLD", " 3 "),
            ("OUROBOROS_BREAKER_COOLDOWN_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.cache.cache_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(config.cache.max_size_bytes, 2048);
        assert!(!config.cache.enable_auto_cleanup);
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.attempt_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown_duration, Duration::from_millis(250));
        assert_eq!(config.client_config().retry.max_retries, 7);
    }

    #[test]
    fn test_unparseable_value_is_config_error() {
        let result = ResilienceConfig::from_lookup(lookup(&[("OUROBOROS_RETRY_MAX_RETRIES", "many")]));
        match result {
            Err(ResilienceError::ConfigError(msg)) => assert!(msg.contains("OUROBOROS_RETRY_MAX_RETRIES")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_combination_rejected() {
        let result = ResilienceConfig::from_lookup(lookup(&[("OUROBOROS_BREAKER_FAILURE_THRESHOLD", "0")]));
        assert!(matches!(result, Err(ResilienceError::ConfigError(_))));
    }
}
