use std::time::Duration;
use tracing::{error, info, warn};

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

/// Request/response access log.
///
/// Logs one event when the request enters and one when it leaves. The
/// response event is `error` when the chain failed, `warn` when it took
/// longer than the slow threshold and `info` otherwise.
#[derive(Debug, Clone)]
pub struct AccessLog {
    skip_paths: Vec<String>,
    slow_threshold: Duration,
    log_headers: bool,
}

impl Default for AccessLog {
    fn default() -> Self {
        Self {
            skip_paths: Vec::new(),
            slow_threshold: Duration::from_millis(500),
            log_headers: false,
        }
    }
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not log requests whose path starts with `prefix` (e.g. `/health`).
    #[must_use]
    pub fn skip_path(mut self, prefix: impl Into<String>) -> Self {
        self.skip_paths.push(prefix.into());
        self
    }

    #[must_use]
    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    #[must_use]
    pub fn log_headers(mut self, enabled: bool) -> Self {
        self.log_headers = enabled;
        self
    }

    fn skipped(&self, path: &str) -> bool {
        self.skip_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

impl Middleware for AccessLog {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        if self.skipped(ctx.path()) {
            return next.run(ctx);
        }

        if self.log_headers {
            info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.path(),
                headers = ?ctx.request().headers(),
                "Request"
            );
        } else {
            info!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                path = %ctx.path(),
                "Request"
            );
        }

        let result = next.run(ctx);
        let duration = ctx.elapsed();
        let status = ctx.response().status().as_u16();
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        match &result {
            Err(e) => error!(
                request_id = %ctx.request_id(),
                status,
                duration_ms,
                error = %e,
                "Response"
            ),
            Ok(()) if duration > self.slow_threshold => warn!(
                request_id = %ctx.request_id(),
                status,
                duration_ms,
                threshold_ms = u64::try_from(self.slow_threshold.as_millis()).unwrap_or(u64::MAX),
                "Slow response"
            ),
            Ok(()) => info!(
                request_id = %ctx.request_id(),
                status,
                duration_ms,
                "Response"
            ),
        }
        result
    }

    fn name(&self) -> &'static str {
        "access_log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_paths_are_prefixes() {
        let log = AccessLog::new().skip_path("/health");
        assert!(log.skipped("/health"));
        assert!(log.skipped("/healthz"));
        assert!(!log.skipped("/api/health"));
    }
}
