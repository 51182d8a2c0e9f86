//! Structured logging setup
//!
//! The engine logs through the `tracing` facade only. This module installs a
//! `tracing-subscriber` registry for binaries and tests that want output:
//! JSON lines for production, pretty output for development.
//!
//! Environment:
//!
//! - `NEURITE_LOG_LEVEL`: trace/debug/info/warn/error (default `info`)
//! - `NEURITE_LOG_FORMAT`: json/pretty (default `json`)
//! - `NEURITE_LOG_TARGETS`: extra comma-separated filter directives,
//!   e.g. `neurite::worker_pool=debug`
//! - `NEURITE_LOG_INCLUDE_LOCATION`: `true` to add file:line
//!
//! `RUST_LOG`, when set, replaces the level from `NEURITE_LOG_LEVEL`.

use anyhow::{Context, Result};
use std::env;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Layer};

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Unknown names fall back to `info`
    pub log_level: String,
    pub format: LogFormat,
    /// Extra filter directives (comma-separated)
    pub target_filter: Option<String>,
    /// Add file:line to every event
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::default_prod()
    }
}

impl LogConfig {
    /// Read `NEURITE_LOG_*`, falling back to the production defaults.
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("NEURITE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: LogFormat::parse(
                &env::var("NEURITE_LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
            ),
            target_filter: env::var("NEURITE_LOG_TARGETS")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            include_location: env::var("NEURITE_LOG_INCLUDE_LOCATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_string(),
            format: LogFormat::Pretty,
            target_filter: None,
            include_location: true,
        }
    }

    pub fn default_prod() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            target_filter: None,
            include_location: false,
        }
    }

    fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Build the filter: `RUST_LOG` or the configured level, plus targets.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));

        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                let parsed: Directive = directive
                    .parse()
                    .with_context(|| format!("invalid log filter directive '{directive}'"))?;
                filter = filter.add_directive(parsed);
            }
        }
        Ok(filter)
    }
}

/// Install the global subscriber.
///
/// Fails, rather than panicking, when a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let env_filter = config.env_filter()?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Json);
    }

    #[test]
    fn test_level_parse_falls_back_to_info() {
        let mut config = LogConfig::default_dev();
        assert_eq!(config.level(), Level::DEBUG);
        config.log_level = "verbose".into();
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn test_invalid_target_directive_is_an_error() {
        let config = LogConfig {
            target_filter: Some("neurite=debug, neurite::router=verbose".into()),
            ..LogConfig::default_prod()
        };
        assert!(config.env_filter().is_err());
    }

    #[test]
    fn test_second_init_fails_instead_of_panicking() {
        let config = LogConfig::default_prod();
        // The first call may lose to another test; the second never wins.
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
