//! Route table and its build-time builder.

use http::Method;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::group::{join_paths, RouteGroup};
use super::radix::{parse_pattern, RadixTree, RouteId};
use crate::error::RouteError;
use crate::middleware::{Chain, Handler, Middleware};

/// Maximum number of path/query parameters before heap allocation.
/// Most REST APIs have ≤4 path params (e.g., /users/:id/posts/:postId).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Captured parameters in path order.
///
/// Names are `Arc<str>` shared with the trie; values are per-request strings.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// A registered route with its precomputed middleware chain.
pub struct RouteEntry {
    method: Method,
    pattern: Arc<str>,
    chain: Chain,
}

impl RouteEntry {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn pattern_arc(&self) -> Arc<str> {
        Arc::clone(&self.pattern)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("chain", &self.chain)
            .finish()
    }
}

/// Result of successfully matching a request path to a route.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteEntry,
    /// Path parameters in left-to-right order.
    pub params: ParamVec,
}

impl RouteMatch<'_> {
    /// Get a path parameter by name
    ///
    /// Uses "last write wins" semantics: if the same name appears at several
    /// depths, the deepest occurrence is returned.
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Immutable (method, path) → route lookup.
///
/// Produced by [`RouteTableBuilder::build`] and shared behind an `Arc`.
/// There is no way to register into a built table, so the serving phase
/// reads it without locking.
pub struct RouteTable {
    tree: RadixTree,
    routes: Vec<RouteEntry>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes().collect::<Vec<_>>())
            .finish()
    }
}

impl RouteTable {
    /// Match `path` for `method`.
    ///
    /// Returns `None` for unknown paths and for known paths without a route
    /// for `method`. Never panics on arbitrary input.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let mut params = ParamVec::new();
        let route = self.resolve_into(method, path, &mut params)?;
        Some(RouteMatch { route, params })
    }

    /// Like [`resolve`](Self::resolve) but appends params into a caller-owned
    /// buffer, so a pooled context can reuse its capacity.
    pub fn resolve_into(
        &self,
        method: &Method,
        path: &str,
        params: &mut ParamVec,
    ) -> Option<&RouteEntry> {
        let id = self.tree.search(method, path, params)?;
        self.routes.get(id)
    }

    /// Registered (method, pattern) pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> + '_ {
        self.routes.iter().map(|r| (&r.method, r.pattern()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

struct PendingRoute {
    method: Method,
    pattern: Arc<str>,
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

/// Single-threaded build phase for a [`RouteTable`].
///
/// Registration errors surface immediately so startup can abort on the
/// first bad route. Global middleware may be added before or after routes;
/// it wraps every route once the table is built.
#[derive(Default)]
pub struct RouteTableBuilder {
    tree: RadixTree,
    pending: Vec<PendingRoute>,
    global: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for RouteTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTableBuilder")
            .field("routes", &self.pending.len())
            .field("global_middlewares", &self.global.len())
            .finish()
    }
}

impl RouteTableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the global chain.
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.global.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware to the global chain.
    pub fn use_shared(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.global.push(middleware);
        self
    }

    /// Register `handler` for `method` (e.g. `"GET"`) and `pattern`.
    pub fn register<H: Handler + 'static>(
        &mut self,
        method: &str,
        pattern: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        let method = parse_method(method)?;
        self.route_with(method, pattern, Arc::new(handler), Vec::new())?;
        Ok(self)
    }

    /// Register with a per-route middleware list, innermost to the group's.
    pub fn route_with(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Result<&mut Self, RouteError> {
        let segments = parse_pattern(pattern)?;
        let id: RouteId = self.pending.len();
        self.tree.insert(pattern, &segments, method.clone(), id)?;
        debug!(method = %method, pattern = %pattern, middlewares = middlewares.len(), "Route registered");
        self.pending.push(PendingRoute {
            method,
            pattern: Arc::from(pattern),
            middlewares,
            handler,
        });
        Ok(self)
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

    /// Open a group that prefixes patterns and adds middleware to every
    /// route registered through it.
    pub fn group(&mut self, prefix: &str, middlewares: Vec<Arc<dyn Middleware>>) -> RouteGroup<'_> {
        RouteGroup::new(self, join_paths("", prefix), middlewares)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Seal the table, composing global middleware in front of each route's
    /// own list.
    #[must_use]
    pub fn build(self) -> Arc<RouteTable> {
        let global = self.global;
        let routes: Vec<RouteEntry> = self
            .pending
            .into_iter()
            .map(|p| {
                let mut chain = Vec::with_capacity(global.len() + p.middlewares.len());
                chain.extend(global.iter().map(Arc::clone));
                chain.extend(p.middlewares);
                RouteEntry {
                    method: p.method,
                    pattern: p.pattern,
                    chain: Chain::new(chain, p.handler),
                }
            })
            .collect();

        let summary: Vec<String> = routes
            .iter()
            .take(10)
            .map(|r| format!("{} {}", r.method, r.pattern))
            .collect();
        info!(
            routes_count = routes.len(),
            global_middlewares = global.len(),
            trie_nodes = self.tree.node_count(),
            routes_summary = ?summary,
            "Route table built"
        );

        Arc::new(RouteTable {
            tree: self.tree,
            routes,
        })
    }
}

pub(super) fn parse_method(method: &str) -> Result<Method, RouteError> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| RouteError::UnsupportedMethod(method.to_string()))
}
