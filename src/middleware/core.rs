use std::fmt;
use std::sync::Arc;

use crate::context::{CancelReason, Context};
use crate::error::HttpError;

/// Result returned by handlers and middleware.
///
/// Return an [`HttpError`] inside the `anyhow::Error` to choose the status;
/// anything else becomes a 500.
pub type HandlerResult = anyhow::Result<()>;

/// Terminal request handler attached to a route.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: &mut Context) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync,
{
    fn call(&self, ctx: &mut Context) -> HandlerResult {
        self(ctx)
    }
}

/// A wrapping behavior around the rest of the chain.
///
/// Implementations decide whether to call `next.run(ctx)`. Returning without
/// calling it short-circuits every inner layer and the handler; whatever was
/// written to `ctx` by then is the response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult;

    /// Name used in logs and `Debug` output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The remainder of a chain, handed to each middleware.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Enter the next layer, or the handler when no layers remain.
    ///
    /// Once the request is cancelled no further layer is entered; the
    /// cancellation surfaces as an [`HttpError`] instead.
    pub fn run(self, ctx: &mut Context) -> HandlerResult {
        if let Some(reason) = ctx.cancel_token().reason() {
            return Err(cancellation_error(reason).into());
        }
        match self.middlewares.split_first() {
            Some((first, rest)) => first.handle(
                ctx,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(ctx),
        }
    }

    /// Layers left before the handler.
    pub fn remaining(&self) -> usize {
        self.middlewares.len()
    }
}

pub(crate) fn cancellation_error(reason: CancelReason) -> HttpError {
    match reason {
        CancelReason::Cancelled => HttpError::cancelled(),
        CancelReason::DeadlineExceeded => HttpError::timed_out(),
    }
}

/// A route's middleware list composed with its handler.
///
/// Built once when the route table is sealed; running it costs one slice
/// walk per request regardless of how the route was grouped.
#[derive(Clone)]
pub struct Chain {
    middlewares: Arc<[Arc<dyn Middleware>]>,
    endpoint: Arc<dyn Handler>,
}

impl Chain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, endpoint: Arc<dyn Handler>) -> Self {
        Self {
            middlewares: middlewares.into(),
            endpoint,
        }
    }

    /// Run the outermost layer. First registered observes the request first
    /// and the response last.
    pub fn run(&self, ctx: &mut Context) -> HandlerResult {
        Next {
            middlewares: &self.middlewares,
            endpoint: self.endpoint.as_ref(),
        }
        .run(ctx)
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("middlewares", &self.middleware_names())
            .finish_non_exhaustive()
    }
}

/// Middleware built from a closure.
pub struct FnMiddleware<F> {
    f: F,
    name: &'static str,
}

/// Wrap a closure as a [`Middleware`].
///
/// ```rust,ignore
/// let timing = neurite::middleware::from_fn("timing", |ctx, next| {
///     let res = next.run(ctx);
///     tracing::debug!(elapsed_us = ctx.elapsed().as_micros() as u64, "done");
///     res
/// });
/// ```
pub fn from_fn<F>(name: &'static str, f: F) -> FnMiddleware<F>
where
    F: for<'c, 'n> Fn(&'c mut Context, Next<'n>) -> HandlerResult + Send + Sync,
{
    FnMiddleware { f, name }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'c, 'n> Fn(&'c mut Context, Next<'n>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        (self.f)(ctx, next)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
