//! # Router Module
//!
//! Maps an incoming (method, path) pair to a registered route and the path
//! parameters it captured.
//!
//! ## Overview
//!
//! Routing happens in two phases:
//!
//! 1. **Build**: a [`RouteTableBuilder`] collects `(method, pattern, handler)`
//!    registrations, optionally through [`RouteGroup`]s that share a prefix and
//!    middleware. Bad or duplicate patterns are rejected immediately.
//!    [`RouteTableBuilder::build`] composes each route's middleware chain and
//!    seals everything into an immutable [`RouteTable`].
//!
//! 2. **Resolve**: [`RouteTable::resolve`] walks a segment trie one path
//!    segment at a time. Per segment a static child beats a `:param` child,
//!    which beats a `*wildcard` child; a branch that dead-ends backtracks to
//!    the next candidate at the same depth.
//!
//! ## Pattern syntax
//!
//! - `/users` matches literally
//! - `/users/:id` captures one segment as `id`
//! - `/files/*path` captures the remaining segments (joined by `/`) as `path`
//!
//! A single leading and trailing slash is trimmed before splitting, so
//! `/health` and `/health/` are the same route. Empty interior segments are
//! rejected in patterns and never match a parameter at request time.
//!
//! ## Example
//!
//! ```rust,ignore
//! use neurite::router::RouteTableBuilder;
//! use http::Method;
//!
//! let mut builder = RouteTableBuilder::new();
//! builder.get("/users/:id/posts/:postId", get_post)?;
//! let table = builder.build();
//!
//! let m = table.resolve(&Method::GET, "/users/42/posts/7").unwrap();
//! assert_eq!(m.param("postId"), Some("7"));
//! ```

mod core;
mod group;
mod radix;

pub use core::{ParamVec, RouteEntry, RouteMatch, RouteTable, RouteTableBuilder, MAX_INLINE_PARAMS};
pub use group::RouteGroup;
pub use radix::{parse_pattern, Segment};
