use tracing::field::Empty;
use tracing::info_span;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

/// Opens a `tracing` span around the rest of the chain.
///
/// The span carries the request id, method, path and matched route, and
/// records the final status and latency. Every event emitted by inner layers
/// and the handler is attached to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestSpan;

impl Middleware for RequestSpan {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        let span = info_span!(
            "request",
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = %ctx.path(),
            route = ctx.route_pattern().unwrap_or(""),
            status = Empty,
            latency_ms = Empty,
        );
        let _entered = span.enter();
        let result = next.run(ctx);
        span.record("status", ctx.response().status().as_u16());
        span.record(
            "latency_ms",
            u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        result
    }

    fn name(&self) -> &'static str {
        "request_span"
    }
}
