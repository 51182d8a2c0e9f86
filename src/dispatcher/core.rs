use http::StatusCode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::recovery;
use crate::context::{CancelToken, Context, ContextPool, PooledContext};
use crate::error::{codes, HttpError, PoolError};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::middleware::{cancellation_error, Chain};
use crate::router::{RouteEntry, RouteTable};
use crate::server::{Request, Response};
use crate::shutdown::Lifecycle;
use crate::worker_pool::{Job, WorkerPool};

/// How often a caller waiting on a pooled job re-checks its cancel token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where a matched chain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// On the thread that called `serve`.
    #[default]
    Inline,
    /// On a worker pool thread; the caller waits for the reply.
    Pooled,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "pooled" | "pool" => Ok(Self::Pooled),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

/// Turns one [`Request`] into one [`Response`].
///
/// `serve` never fails and never panics: unmatched routes, handler errors,
/// saturation and recovered panics all come back as responses carrying the
/// standard error body. Every response echoes the request id.
pub struct Dispatcher {
    table: Arc<RouteTable>,
    contexts: Arc<ContextPool>,
    workers: Option<Arc<WorkerPool>>,
    lifecycle: Arc<Lifecycle>,
    request_timeout: Option<Duration>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.table.len())
            .field("mode", &self.mode())
            .field("request_timeout", &self.request_timeout)
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// An inline dispatcher over a sealed route table.
    pub fn new(table: Arc<RouteTable>, contexts: Arc<ContextPool>, lifecycle: Arc<Lifecycle>) -> Self {
        recovery::install_panic_hook();
        Self {
            table,
            contexts,
            workers: None,
            lifecycle,
            request_timeout: None,
        }
    }

    /// Run chains on `workers` instead of the calling thread.
    #[must_use]
    pub fn with_worker_pool(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Per-request deadline, combined with any token the transport supplies.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.workers.is_some() {
            ExecutionMode::Pooled
        } else {
            ExecutionMode::Inline
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn context_pool(&self) -> &Arc<ContextPool> {
        &self.contexts
    }

    pub fn worker_pool(&self) -> Option<&Arc<WorkerPool>> {
        self.workers.as_ref()
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Dispatch one request.
    pub fn serve(&self, mut request: Request) -> Response {
        let request_id = RequestId::from_header_or_new(request.header(REQUEST_ID_HEADER));

        let Some(_admitted) = self.lifecycle.enter() else {
            debug!(
                request_id = %request_id,
                state = %self.lifecycle.state(),
                "Rejecting request, engine is not running"
            );
            return with_request_id(
                Response::error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::SERVICE_UNAVAILABLE,
                    "Server is shutting down",
                ),
                request_id,
            );
        };

        let deadline = self.request_timeout.map(|t| Instant::now() + t);
        let cancel = match request.take_cancel() {
            Some(parent) => parent.child(deadline),
            None => deadline.map_or_else(CancelToken::new, CancelToken::with_deadline),
        };

        let mut ctx = self.contexts.acquire_guarded();
        let Some(route) =
            self.table
                .resolve_into(request.method(), request.path(), ctx.params_mut())
        else {
            debug!(
                request_id = %request_id,
                method = %request.method(),
                path = %request.path(),
                "No route matched"
            );
            let message = format!("No route for {} {}", request.method(), request.path());
            return with_request_id(
                Response::error(StatusCode::NOT_FOUND, codes::NOT_FOUND, &message),
                request_id,
            );
        };

        ctx.set_route(route.pattern_arc());
        ctx.begin(request, request_id, cancel.clone());
        debug!(
            request_id = %request_id,
            method = %route.method(),
            route = %route.pattern(),
            middleware_count = route.chain().len(),
            "Request dispatched"
        );

        let response = match &self.workers {
            None => execute(route.chain(), &mut ctx),
            Some(workers) => execute_pooled(workers, route, ctx, &cancel, request_id),
        };
        with_request_id(response, request_id)
    }
}

/// Run `chain` against `ctx` and turn every outcome into a response.
///
/// This is the single recovery point for a request.
fn execute(chain: &Chain, ctx: &mut Context) -> Response {
    match catch_unwind(AssertUnwindSafe(|| chain.run(ctx))) {
        Ok(Ok(())) => ctx.take_response(),
        Ok(Err(err)) => error_response(ctx, &err),
        Err(payload) => {
            let report = recovery::take_report(payload.as_ref());
            let backtrace = report
                .backtrace
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            error!(
                request_id = %ctx.request_id(),
                method = %ctx.method(),
                route = ctx.route_pattern().unwrap_or("-"),
                panic_message = %report.message,
                location = report.location.as_deref().unwrap_or("unknown"),
                backtrace = %backtrace,
                "Handler panicked, request recovered"
            );
            Response::internal_error()
        }
    }
}

fn execute_pooled(
    workers: &WorkerPool,
    route: &RouteEntry,
    ctx: PooledContext,
    cancel: &CancelToken,
    request_id: RequestId,
) -> Response {
    let chain = route.chain().clone();
    // Shared with the job so a caller that gives up can take the context
    // back before a worker ever claims it.
    let slot = Arc::new(Mutex::new(Some(ctx)));
    let job_slot = Arc::clone(&slot);
    let (reply_tx, reply_rx) = flume::bounded::<Response>(1);
    let job = Job::new(format!("{} {}", route.method(), route.pattern()), move || {
        let Some(mut ctx) = job_slot.lock().take() else {
            return;
        };
        let response = execute(&chain, &mut ctx);
        // Release before replying so the caller observes a settled pool.
        drop(ctx);
        let _ = reply_tx.send(response);
    });

    if let Err(e) = workers.submit(job) {
        return match e {
            PoolError::QueueFull { capacity } => {
                debug!(request_id = %request_id, capacity, "Worker queue full");
                Response::error(
                    StatusCode::TOO_MANY_REQUESTS,
                    codes::TOO_MANY_REQUESTS,
                    "Worker queue is full",
                )
            }
            _ => Response::error(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::SERVICE_UNAVAILABLE,
                "Worker pool is closed",
            ),
        };
    }

    let reason = loop {
        let tick = Instant::now() + CANCEL_POLL_INTERVAL;
        let until = cancel.deadline().map_or(tick, |d| d.min(tick));
        match reply_rx.recv_deadline(until) {
            Ok(response) => return response,
            Err(flume::RecvTimeoutError::Disconnected) => {
                warn!(
                    request_id = %request_id,
                    route = %route.pattern(),
                    "Worker pool dropped the request"
                );
                return Response::error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::SERVICE_UNAVAILABLE,
                    "Request was abandoned during shutdown",
                );
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                if let Some(reason) = cancel.reason() {
                    break reason;
                }
            }
        }
    };

    if let Ok(response) = reply_rx.try_recv() {
        return response;
    }
    cancel.cancel();
    // A job still in the queue never runs; its context goes back now.
    let reclaimed = slot.lock().take().is_some();
    warn!(
        request_id = %request_id,
        route = %route.pattern(),
        reason = ?reason,
        job_started = !reclaimed,
        "Request abandoned while waiting for worker"
    );
    let err = cancellation_error(reason);
    Response::json(err.status, &err.body())
}

fn error_response(ctx: &Context, err: &anyhow::Error) -> Response {
    if let Some(http) = err.downcast_ref::<HttpError>() {
        debug!(
            request_id = %ctx.request_id(),
            status = http.status.as_u16(),
            code = %http.code,
            "Request ended with HTTP error"
        );
        return Response::json(http.status, &http.body());
    }
    error!(
        request_id = %ctx.request_id(),
        method = %ctx.method(),
        route = ctx.route_pattern().unwrap_or("-"),
        error = %format!("{err:#}"),
        "Handler returned error"
    );
    Response::internal_error()
}

fn with_request_id(mut response: Response, request_id: RequestId) -> Response {
    response.set_header(REQUEST_ID_HEADER, &request_id.to_string());
    response
}
