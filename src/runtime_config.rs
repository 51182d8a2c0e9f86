//! # Runtime Configuration Module
//!
//! [`EngineConfig`] collects every knob of the dispatch engine. It can be
//! built from defaults, from a YAML file, from environment variables, or from
//! a file with the environment layered on top.
//!
//! ## Environment Variables
//!
//! | Variable                          | Field                     |
//! |-----------------------------------|---------------------------|
//! | `NEURITE_WORKERS`                 | `workers`                 |
//! | `NEURITE_QUEUE_CAPACITY`          | `queue_capacity`          |
//! | `NEURITE_BACKPRESSURE_MODE`       | `backpressure`            |
//! | `NEURITE_BACKPRESSURE_TIMEOUT_MS` | `backpressure_timeout_ms` |
//! | `NEURITE_STACK_SIZE`              | `worker_stack_size`       |
//! | `NEURITE_EXECUTION_MODE`          | `execution`               |
//! | `NEURITE_REQUEST_TIMEOUT_MS`      | `request_timeout_ms`      |
//! | `NEURITE_SHUTDOWN_TIMEOUT_MS`     | `shutdown_timeout_ms`     |
//! | `NEURITE_CONTEXT_POOL_MAX_IDLE`   | `context_pool_max_idle`   |
//! | `NEURITE_SLOW_REQUEST_MS`         | `slow_request_threshold_ms` |
//!
//! `NEURITE_STACK_SIZE` accepts decimal (`262144`) or hex (`0x40000`).
//! Unparseable values are logged and ignored.
//!
//! ## Example
//!
//! ```yaml
//! workers: 8
//! queue_capacity: 2048
//! backpressure: block
//! backpressure_timeout_ms: 25
//! execution: pooled
//! request_timeout_ms: 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::dispatcher::ExecutionMode;
use crate::error::ConfigError;
use crate::worker_pool::{BackpressureMode, WorkerPoolConfig};

const DEFAULT_STACK_SIZE: usize = 0x40000; // 256KB

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker threads in pooled mode
    pub workers: usize,
    /// Bounded job queue length
    pub queue_capacity: usize,
    pub backpressure: BackpressureMode,
    /// Bounded wait for `block` backpressure
    pub backpressure_timeout_ms: u64,
    pub worker_stack_size: usize,
    pub execution: ExecutionMode,
    /// 0 disables the per-request deadline
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Idle contexts retained by the context pool
    pub context_pool_max_idle: usize,
    /// Requests slower than this are logged at `warn` by `AccessLog`
    pub slow_request_threshold_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: 1024,
            backpressure: BackpressureMode::Reject,
            backpressure_timeout_ms: 50,
            worker_stack_size: DEFAULT_STACK_SIZE,
            execution: ExecutionMode::Inline,
            request_timeout_ms: 0,
            shutdown_timeout_ms: 30_000,
            context_pool_max_idle: 1024,
            slow_request_threshold_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_yaml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without consulting the environment. An empty document
    /// yields the defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        Ok(config)
    }

    /// Apply `NEURITE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "NEURITE_WORKERS", &mut self.workers, str::parse);
        override_from(&lookup, "NEURITE_QUEUE_CAPACITY", &mut self.queue_capacity, str::parse);
        override_from(&lookup, "NEURITE_BACKPRESSURE_MODE", &mut self.backpressure, BackpressureMode::from_str);
        override_from(
            &lookup,
            "NEURITE_BACKPRESSURE_TIMEOUT_MS",
            &mut self.backpressure_timeout_ms,
            str::parse,
        );
        override_from(&lookup, "NEURITE_STACK_SIZE", &mut self.worker_stack_size, parse_size);
        override_from(&lookup, "NEURITE_EXECUTION_MODE", &mut self.execution, ExecutionMode::from_str);
        override_from(&lookup, "NEURITE_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms, str::parse);
        override_from(&lookup, "NEURITE_SHUTDOWN_TIMEOUT_MS", &mut self.shutdown_timeout_ms, str::parse);
        override_from(
            &lookup,
            "NEURITE_CONTEXT_POOL_MAX_IDLE",
            &mut self.context_pool_max_idle,
            str::parse,
        );
        override_from(
            &lookup,
            "NEURITE_SLOW_REQUEST_MS",
            &mut self.slow_request_threshold_ms,
            str::parse,
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.worker_stack_size < 0x4000 {
            return Err(ConfigError::Invalid(format!(
                "worker_stack_size {} is below the 16KB minimum",
                self.worker_stack_size
            )));
        }
        Ok(())
    }

    pub fn worker_pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(
            self.workers,
            self.queue_capacity,
            self.backpressure,
            self.backpressure_timeout_ms,
            self.worker_stack_size,
        )
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }
}

fn override_from<T, E, L, P>(lookup: &L, key: &str, slot: &mut T, parse: P)
where
    L: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, E>,
    E: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse(raw.trim()) {
        Ok(value) => *slot = value,
        Err(e) => warn!(key = key, value = %raw, error = %e, "Ignoring invalid environment override"),
    }
}

/// Decimal or `0x`-prefixed hex byte count.
pub fn parse_size(s: &str) -> Result<usize, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backpressure, BackpressureMode::Reject);
        assert_eq!(config.execution, ExecutionMode::Inline);
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_size_hex_and_decimal() {
        assert_eq!(parse_size("0x40000").unwrap(), 0x40000);
        assert_eq!(parse_size("0X10").unwrap(), 16);
        assert_eq!(parse_size("32768").unwrap(), 32768);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config.apply_env(env(&[
            ("NEURITE_WORKERS", "3"),
            ("NEURITE_BACKPRESSURE_MODE", "Block"),
            ("NEURITE_STACK_SIZE", "0x8000"),
            ("NEURITE_EXECUTION_MODE", "pooled"),
            ("NEURITE_REQUEST_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.workers, 3);
        assert_eq!(config.backpressure, BackpressureMode::Block);
        assert_eq!(config.worker_stack_size, 0x8000);
        assert_eq!(config.execution, ExecutionMode::Pooled);
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_env_value_is_ignored() {
        let mut config = EngineConfig::default();
        config.apply_env(env(&[
            ("NEURITE_QUEUE_CAPACITY", "many"),
            ("NEURITE_BACKPRESSURE_MODE", "drop"),
        ]));
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.backpressure, BackpressureMode::Reject);
    }

    #[test]
    fn test_yaml_partial_document_keeps_defaults() {
        let config =
            EngineConfig::from_yaml_str("workers: 2\nbackpressure: block\nexecution: pooled\n")
                .unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.backpressure, BackpressureMode::Block);
        assert_eq!(config.execution, ExecutionMode::Pooled);
        assert_eq!(config.queue_capacity, 1024);
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let err = EngineConfig::from_yaml_str("wrokers: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
