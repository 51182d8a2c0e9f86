use http::Method;
use std::sync::Arc;

use super::core::{parse_method, RouteTableBuilder};
use crate::error::RouteError;
use crate::middleware::{Handler, Middleware};

/// Join a group prefix and a pattern with exactly one `/` between them.
pub(crate) fn join_paths(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let pattern = pattern.trim_start_matches('/');
    match (prefix.is_empty(), pattern.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{pattern}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{pattern}"),
    }
}

/// Routes sharing a path prefix and a middleware list.
///
/// Middleware order for a route registered through nested groups is
/// global, outer group, inner group, then the route's own list.
pub struct RouteGroup<'a> {
    builder: &'a mut RouteTableBuilder,
    prefix: String,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl<'a> RouteGroup<'a> {
    pub(crate) fn new(
        builder: &'a mut RouteTableBuilder,
        prefix: String,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            builder,
            prefix,
            middlewares,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Append a middleware for routes registered after this call.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Open a nested group; prefixes and middleware lists are concatenated.
    pub fn group(&mut self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> RouteGroup<'_> {
        let mut combined = self.middlewares.clone();
        combined.extend(middlewares);
        RouteGroup {
            prefix: join_paths(&self.prefix, prefix),
            builder: &mut *self.builder,
            middlewares: combined,
        }
    }

    /// Register with extra per-route middleware.
    pub fn route_with(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<&mut Self, RouteError> {
        let full = join_paths(&self.prefix, pattern);
        let mut chain = self.middlewares.clone();
        chain.extend(middlewares);
        self.builder.route_with(method, &full, handler, chain)?;
        Ok(self)
    }

    pub fn register<H: Handler + 'static>(
        &mut self,
        method: &str,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.route_with(parse_method(method)?, pattern, Arc::new(handler), Vec::new())
    }

    pub fn get<H: Handler + 'static>(&mut self, pattern: &str, h: H) -> Result<&mut Self, RouteError> {
        self.route_with(Method::GET, pattern, Arc::new(h), Vec::new())
    }

    pub fn post<H: Handler + 'static>(&mut self, pattern: &str, h: H) -> Result<&mut Self, RouteError> {
        self.route_with(Method::POST, pattern, Arc::new(h), Vec::new())
    }

    pub fn put<H: Handler + 'static>(&mut self, pattern: &str, h: H) -> Result<&mut Self, RouteError> {
        self.route_with(Method::PUT, pattern, Arc::new(h), Vec::new())
    }

    pub fn patch<H: Handler + 'static>(&mut self, pattern: &str, h: H) -> Result<&mut Self, RouteError> {
        self.route_with(Method::PATCH, pattern, Arc::new(h), Vec::new())
    }

    pub fn delete<H: Handler + 'static>(&mut self, pattern: &str, h: H) -> Result<&mut Self, RouteError> {
        self.route_with(Method::DELETE, pattern, Arc::new(h), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_paths() {
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/api/", "/users/:id"), "/api/users/:id");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("/api", "v1"), "/api/v1");
    }
}
