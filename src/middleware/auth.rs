use http::StatusCode;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;
use crate::error::{codes, ErrorBody};

type Validator<C> = Arc<dyn Fn(&str) -> anyhow::Result<C> + Send + Sync>;

/// Token authentication.
///
/// The token is read from a header (with an optional scheme prefix such as
/// `Bearer `) and, failing that, from a query parameter. The validator turns
/// it into claims, which are stored in the context under `context_key` for
/// inner layers: `ctx.get::<C>("claims")`.
///
/// A missing token answers 401 `UNAUTHORIZED`; a rejected one answers 401
/// `INVALID_TOKEN`. Paths starting with a skip prefix pass through untouched.
pub struct Auth<C> {
    scheme: Option<String>,
    header: Option<String>,
    query_param: Option<String>,
    context_key: String,
    skip_paths: Vec<String>,
    validator: Validator<C>,
}

impl<C> fmt::Debug for Auth<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("scheme", &self.scheme)
            .field("header", &self.header)
            .field("query_param", &self.query_param)
            .field("context_key", &self.context_key)
            .field("skip_paths", &self.skip_paths)
            .finish_non_exhaustive()
    }
}

impl<C: Any + Send + Sync> Auth<C> {
    /// `Authorization: Bearer <token>`, claims stored under `"claims"`.
    pub fn bearer<F>(validator: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<C> + Send + Sync + 'static,
    {
        Self {
            scheme: Some("Bearer".into()),
            header: Some("authorization".into()),
            query_param: None,
            context_key: "claims".into(),
            skip_paths: Vec::new(),
            validator: Arc::new(validator),
        }
    }

    /// Read the raw token from `header` with no scheme prefix.
    #[must_use]
    pub fn header(mut self, header: &str) -> Self {
        self.header = Some(header.to_ascii_lowercase());
        self.scheme = None;
        self
    }

    #[must_use]
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = Some(scheme.to_string());
        self
    }

    /// Fall back to `?<name>=<token>`.
    #[must_use]
    pub fn query_param(mut self, name: &str) -> Self {
        self.query_param = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn context_key(mut self, key: &str) -> Self {
        self.context_key = key.to_string();
        self
    }

    #[must_use]
    pub fn skip_path(mut self, prefix: &str) -> Self {
        self.skip_paths.push(prefix.to_string());
        self
    }

    fn extract_token<'c>(&self, ctx: &'c Context) -> Option<&'c str> {
        if let Some(header) = &self.header {
            if let Some(value) = ctx.header(header).filter(|v| !v.is_empty()) {
                let token = match &self.scheme {
                    Some(scheme) => value
                        .strip_prefix(scheme.as_str())
                        .and_then(|rest| rest.strip_prefix(' '))
                        .unwrap_or(value),
                    None => value,
                };
                return Some(token.trim());
            }
        }
        self.query_param
            .as_deref()
            .and_then(|name| ctx.query(name))
            .filter(|v| !v.is_empty())
    }
}

impl<C: Any + Send + Sync> Middleware for Auth<C> {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        if self.skip_paths.iter().any(|p| ctx.path().starts_with(p.as_str())) {
            return next.run(ctx);
        }

        let claims = match self.extract_token(ctx) {
            None => {
                return ctx.json(
                    StatusCode::UNAUTHORIZED,
                    &ErrorBody::new(codes::UNAUTHORIZED, "Authentication required"),
                )
            }
            Some(token) => (self.validator)(token),
        };

        match claims {
            Ok(claims) => {
                ctx.set(self.context_key.clone(), claims);
                next.run(ctx)
            }
            Err(e) => {
                debug!(request_id = %ctx.request_id(), error = %e, "Token rejected");
                ctx.json(
                    StatusCode::UNAUTHORIZED,
                    &ErrorBody::new(codes::INVALID_TOKEN, "Invalid authentication token"),
                )
            }
        }
    }

    fn name(&self) -> &'static str {
        "auth"
    }
}
