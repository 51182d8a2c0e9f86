//! Error types for the dispatch engine.
//!
//! Build-time failures (`RouteError`, `ConfigError`) abort startup. Runtime
//! failures on the request path never escape [`crate::dispatcher::Dispatcher::serve`];
//! they are rendered into a [`Response`](crate::server::Response) carrying an
//! [`ErrorBody`].

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised while registering routes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    /// The (method, pattern) pair is already registered.
    #[error("duplicate route: {method} {pattern}")]
    Duplicate { method: String, pattern: String },

    /// The pattern could not be parsed into segments.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A different parameter name already occupies this depth.
    #[error("route '{pattern}' declares ':{requested}' where ':{existing}' is already registered")]
    ConflictingParam {
        pattern: String,
        existing: String,
        requested: String,
    },

    /// A wildcard segment must be the final segment.
    #[error("wildcard must be the last segment in '{pattern}'")]
    WildcardNotLast { pattern: String },

    /// The method string is not a valid HTTP method token.
    #[error("unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),
}

/// Errors raised by the worker pool submission path.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    /// `submit` was called after shutdown began. Permanent; do not retry.
    #[error("worker pool is closed")]
    Closed,

    /// The bounded queue is saturated and the backpressure policy gave up.
    #[error("worker queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// A worker thread could not be spawned at startup.
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

/// Errors raised while loading engine configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Standard body for error responses generated by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Machine-readable codes used in [`ErrorBody::code`].
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const TOO_MANY_REQUESTS: &str = "TOO_MANY_REQUESTS";
    pub const REQUEST_CANCELLED: &str = "REQUEST_CANCELLED";
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
}

/// An error a handler or middleware can return to choose the response status.
///
/// Returned inside an `anyhow::Error`; the dispatcher downcasts it and renders
/// `status` with an [`ErrorBody`]. Any other error maps to 500.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::REQUEST_CANCELLED,
            "Request was cancelled",
        )
    }

    pub fn timed_out() -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            codes::REQUEST_TIMEOUT,
            "Request deadline exceeded",
        )
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.code.clone(), self.message.clone())
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.code, self.message)
    }
}

impl std::error::Error for HttpError {}
