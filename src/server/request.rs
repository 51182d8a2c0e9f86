use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::sync::Arc;
use tracing::warn;

use crate::context::CancelToken;
use crate::router::ParamVec;

/// An inbound request as handed over by the transport collaborator.
///
/// The transport owns wire parsing; the engine only needs the method, the
/// decoded path, the query string, headers and the raw body.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: ParamVec,
    headers: HeaderMap,
    body: Vec<u8>,
    cancel: Option<CancelToken>,
}

impl Request {
    /// Build a request from a method and a path with an optional query string.
    ///
    /// `uri` is split at the first `?`; the query part is url-decoded into
    /// name/value pairs in order of appearance.
    #[must_use]
    pub fn new(method: Method, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, parse_query_params(query)),
            None => (uri, ParamVec::new()),
        };
        Self {
            method,
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
            headers: HeaderMap::new(),
            body: Vec::new(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    #[must_use]
    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Add a header. Invalid names or values are dropped with a warning.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid request header"),
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a cancellation signal owned by the transport (client gone,
    /// upstream deadline, ...).
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &ParamVec {
        &self.query
    }

    /// Last occurrence wins for repeated query keys.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as UTF-8; lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn cancel_token(&self) -> Option<&CancelToken> {
        self.cancel.as_ref()
    }

    pub(crate) fn take_cancel(&mut self) -> Option<CancelToken> {
        self.cancel.take()
    }

    /// Empty every field in place so the buffers can be reused.
    pub(crate) fn clear(&mut self) {
        self.method = Method::GET;
        self.path.clear();
        self.query.clear();
        self.headers.clear();
        self.body.clear();
        self.cancel = None;
    }
}

/// Parse an `a=1&b=two` query string into ordered pairs.
#[must_use]
pub fn parse_query_params(query: &str) -> ParamVec {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (Arc::<str>::from(k.as_ref()), v.into_owned()))
        .collect()
}
