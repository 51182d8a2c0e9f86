//! Segment trie used by the route table.
//!
//! Nodes live in a single arena (`Vec<Node>`) and refer to their children by
//! index, so each node has exactly one owner and the finished tree is a plain
//! read-only value that can be shared across threads without locking.
//!
//! A node holds:
//! - static children keyed by literal segment text
//! - at most one `:param` child
//! - at most one `*wildcard` child, which is always a leaf
//! - the routes that terminate at this node, keyed by HTTP method
//!
//! ## Matching
//!
//! Per segment the candidates are tried in the order static, param, wildcard.
//! A candidate that dead-ends further down (no route for the method at the
//! end) backtracks to the next candidate at the same depth, so the most
//! specific route that can actually serve the request wins.

use http::Method;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

use super::core::ParamVec;
use crate::error::RouteError;

/// Index of a node in the arena.
type NodeId = usize;

/// Index of a route in the owning table.
pub(crate) type RouteId = usize;

const ROOT: NodeId = 0;

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

#[derive(Debug, Default)]
struct Node {
    statics: HashMap<Box<str>, NodeId>,
    param: Option<(Arc<str>, NodeId)>,
    wildcard: Option<(Arc<str>, NodeId)>,
    routes: HashMap<Method, RouteId>,
}

#[derive(Debug)]
pub(crate) struct RadixTree {
    nodes: Vec<Node>,
}

impl Default for RadixTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim one leading and one trailing slash, then split on `/`.
///
/// `/` and the empty string both yield zero segments (the root).
pub(crate) fn split_path(path: &str) -> SmallVec<[&str; 16]> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return SmallVec::new();
    }
    trimmed.split('/').collect()
}

/// Parse a registration pattern such as `/users/:id/files/*rest`.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    let invalid = |reason: &str| RouteError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if !pattern.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }

    let raw = split_path(pattern);
    let mut segments = Vec::with_capacity(raw.len());
    for (i, seg) in raw.iter().enumerate() {
        if seg.is_empty() {
            return Err(invalid("empty segment"));
        }
        let parsed = if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter without a name"));
            }
            Segment::Param(name.to_string())
        } else if let Some(name) = seg.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err(RouteError::WildcardNotLast {
                    pattern: pattern.to_string(),
                });
            }
            let name = if name.is_empty() { "wildcard" } else { name };
            Segment::Wildcard(name.to_string())
        } else {
            Segment::Static((*seg).to_string())
        };
        segments.push(parsed);
    }
    Ok(segments)
}

impl RadixTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    fn push_node(&mut self) -> NodeId {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    /// Attach `route` under `segments` for `method`.
    pub(crate) fn insert(
        &mut self,
        pattern: &str,
        segments: &[Segment],
        method: Method,
        route: RouteId,
    ) -> Result<(), RouteError> {
        let mut node = ROOT;
        for segment in segments {
            node = match segment {
                Segment::Static(text) => match self.nodes[node].statics.get(text.as_str()) {
                    Some(&child) => child,
                    None => {
                        let child = self.push_node();
                        self.nodes[node]
                            .statics
                            .insert(text.clone().into_boxed_str(), child);
                        child
                    }
                },
                Segment::Param(name) => match &self.nodes[node].param {
                    Some((existing, child)) if existing.as_ref() == name.as_str() => *child,
                    Some((existing, _)) => {
                        return Err(RouteError::ConflictingParam {
                            pattern: pattern.to_string(),
                            existing: existing.to_string(),
                            requested: name.clone(),
                        })
                    }
                    None => {
                        let child = self.push_node();
                        self.nodes[node].param = Some((Arc::from(name.as_str()), child));
                        child
                    }
                },
                Segment::Wildcard(name) => match &self.nodes[node].wildcard {
                    Some((existing, child)) if existing.as_ref() == name.as_str() => *child,
                    Some((existing, _)) => {
                        return Err(RouteError::ConflictingParam {
                            pattern: pattern.to_string(),
                            existing: existing.to_string(),
                            requested: name.clone(),
                        })
                    }
                    None => {
                        let child = self.push_node();
                        self.nodes[node].wildcard = Some((Arc::from(name.as_str()), child));
                        child
                    }
                },
            };
        }

        let routes = &mut self.nodes[node].routes;
        if routes.contains_key(&method) {
            return Err(RouteError::Duplicate {
                method: method.to_string(),
                pattern: pattern.to_string(),
            });
        }
        routes.insert(method, route);
        Ok(())
    }

    /// Resolve `path` for `method`, appending captured params in path order.
    ///
    /// On a miss `params` is left exactly as it was passed in.
    pub(crate) fn search(
        &self,
        method: &Method,
        path: &str,
        params: &mut ParamVec,
    ) -> Option<RouteId> {
        let segments = split_path(path);
        self.search_node(ROOT, &segments, method, params)
    }

    fn search_node(
        &self,
        node: NodeId,
        segments: &[&str],
        method: &Method,
        params: &mut ParamVec,
    ) -> Option<RouteId> {
        let node = &self.nodes[node];
        let Some((&segment, rest)) = segments.split_first() else {
            return node.routes.get(method).copied();
        };

        if !segment.is_empty() {
            if let Some(&child) = node.statics.get(segment) {
                if let Some(route) = self.search_node(child, rest, method, params) {
                    return Some(route);
                }
            }

            if let Some((name, child)) = &node.param {
                params.push((Arc::clone(name), segment.to_string()));
                if let Some(route) = self.search_node(*child, rest, method, params) {
                    return Some(route);
                }
                params.pop();
            }
        }

        if let Some((name, child)) = &node.wildcard {
            if let Some(&route) = self.nodes[*child].routes.get(method) {
                params.push((Arc::clone(name), segments.join("/")));
                return Some(route);
            }
        }

        None
    }

    /// Number of nodes in the arena, root included.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
