use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use crate::error::HttpError;
use crate::ids::RequestId;
use crate::middleware::HandlerResult;
use crate::router::ParamVec;
use crate::server::response::{APPLICATION_JSON, TEXT_PLAIN};
use crate::server::{Request, Response};

type StoreValue = Box<dyn Any + Send + Sync>;

/// Per-request state threaded through the middleware chain and the handler.
///
/// A `Context` is owned by exactly one in-flight request between
/// [`ContextPool::acquire`](super::ContextPool::acquire) and
/// [`ContextPool::release`](super::ContextPool::release). Handlers only ever
/// see `&mut Context`, so no reference can outlive the dispatch that lent it.
pub struct Context {
    request_id: RequestId,
    request: Request,
    response: Response,
    written: bool,
    params: ParamVec,
    route: Option<Arc<str>>,
    store: HashMap<String, StoreValue>,
    cancel: CancelToken,
    started: Instant,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.request_id)
            .field("method", self.request.method())
            .field("path", &self.request.path())
            .field("params", &self.params)
            .field("route", &self.route)
            .field("store_keys", &self.store.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Context {
    /// Create an empty context. Normally only the pool calls this.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            request: Request::new(Method::GET, "/"),
            response: Response::default(),
            written: false,
            params: ParamVec::new(),
            route: None,
            store: HashMap::with_capacity(8),
            cancel: CancelToken::new(),
            started: Instant::now(),
        }
    }

    /// Bind a fresh request to this (already cleared) context.
    pub(crate) fn begin(&mut self, request: Request, request_id: RequestId, cancel: CancelToken) {
        self.request = request;
        self.request_id = request_id;
        self.cancel = cancel;
        self.started = Instant::now();
    }

    pub(crate) fn set_route(&mut self, pattern: Arc<str>) {
        self.route = Some(pattern);
    }

    pub(crate) fn params_mut(&mut self) -> &mut ParamVec {
        &mut self.params
    }

    /// Hand the response to the caller, leaving an empty one behind.
    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    /// Reset every mutable field. Store and params keep their capacity.
    pub(crate) fn clear(&mut self) {
        self.request.clear();
        self.response.reset();
        self.written = false;
        self.params.clear();
        self.route = None;
        self.store.clear();
        self.cancel = CancelToken::new();
    }

    // ---------------------------------------------------------------------
    // Request side
    // ---------------------------------------------------------------------

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    /// Pattern of the matched route, e.g. `/users/:id`.
    pub fn route_pattern(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Path parameter by name. Repeated names resolve to the last occurrence.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Path parameters in left-to-right path order.
    pub fn params(&self) -> &[(Arc<str>, String)] {
        &self.params
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query_param(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn body(&self) -> &[u8] {
        self.request.body()
    }

    /// Deserialize the request body as JSON; malformed input becomes a 400.
    pub fn bind_json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_slice(self.request.body()).map_err(|e| {
            HttpError::new(
                StatusCode::BAD_REQUEST,
                crate::error::codes::BAD_REQUEST,
                format!("invalid JSON body: {e}"),
            )
            .into()
        })
    }

    // ---------------------------------------------------------------------
    // Response side
    // ---------------------------------------------------------------------

    /// Set the status without writing a body.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.response.set_status(status);
        self.written = true;
        self
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, status: StatusCode, value: &T) -> HandlerResult {
        let body = serde_json::to_vec(value)?;
        self.write(status, APPLICATION_JSON, body);
        Ok(())
    }

    /// Raw bytes with an explicit content type.
    pub fn blob(&mut self, status: StatusCode, content_type: &str, data: &[u8]) -> HandlerResult {
        let content_type = HeaderValue::from_str(content_type)?;
        self.write(status, content_type, data.to_vec());
        Ok(())
    }

    pub fn text(&mut self, status: StatusCode, body: &str) -> HandlerResult {
        self.write(status, TEXT_PLAIN, body.as_bytes().to_vec());
        Ok(())
    }

    pub fn no_content(&mut self, status: StatusCode) -> HandlerResult {
        self.response.set_status(status);
        self.response.body_mut().clear();
        self.response.headers_mut().remove(CONTENT_TYPE);
        self.written = true;
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> HandlerResult {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.response.headers_mut().insert(name, value);
        Ok(())
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Whether anything has written a status or body yet.
    pub fn is_written(&self) -> bool {
        self.written
    }

    fn write(&mut self, status: StatusCode, content_type: HeaderValue, body: Vec<u8>) {
        self.response.set_status(status);
        self.response.headers_mut().insert(CONTENT_TYPE, content_type);
        self.response.set_body(body);
        self.written = true;
    }

    // ---------------------------------------------------------------------
    // Scoped store
    // ---------------------------------------------------------------------

    /// Store a value for later middleware layers or the handler.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Typed lookup; `None` if absent or stored under a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.store.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    // ---------------------------------------------------------------------
    // Cancellation
    // ---------------------------------------------------------------------

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Time since the context was bound to the current request.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_for(req: Request) -> Context {
        let mut ctx = Context::new();
        ctx.clear();
        ctx.begin(req, RequestId::new(), CancelToken::new());
        ctx
    }

    #[test]
    fn test_store_typed_roundtrip() {
        let mut ctx = ctx_for(Request::get("/"));
        ctx.set("user", String::from("alice"));
        ctx.set("attempts", 3u32);
        assert_eq!(ctx.get::<String>("user").map(String::as_str), Some("alice"));
        assert_eq!(ctx.get::<u32>("attempts"), Some(&3));
        assert!(ctx.get::<u64>("attempts").is_none());
        assert!(ctx.remove("user"));
        assert!(!ctx.contains("user"));
    }

    #[test]
    fn test_clear_wipes_request_state() {
        let mut ctx = ctx_for(Request::get("/a?x=1").with_header("x-a", "1"));
        ctx.params_mut().push((Arc::from("id"), "7".to_string()));
        ctx.set("k", 1u8);
        ctx.text(StatusCode::OK, "hi").unwrap();

        ctx.clear();
        assert!(ctx.params().is_empty());
        assert_eq!(ctx.store_len(), 0);
        assert!(!ctx.is_written());
        assert!(ctx.response().body().is_empty());
        assert!(ctx.request().headers().is_empty());
        assert!(ctx.route_pattern().is_none());
    }

    #[test]
    fn test_json_writer_sets_content_type() {
        let mut ctx = ctx_for(Request::get("/"));
        ctx.json(StatusCode::CREATED, &serde_json::json!({"ok": true}))
            .unwrap();
        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.json_body().unwrap(), serde_json::json!({"ok": true}));
    }

    #[test]
    fn test_no_content_clears_body_and_content_type() {
        let mut ctx = ctx_for(Request::get("/"));
        ctx.text(StatusCode::OK, "x").unwrap();
        ctx.no_content(StatusCode::NO_CONTENT).unwrap();
        assert_eq!(ctx.response().status(), StatusCode::NO_CONTENT);
        assert!(ctx.response().body().is_empty());
        assert!(ctx.response().header("content-type").is_none());
    }

    #[test]
    fn test_bind_json_maps_to_bad_request() {
        #[derive(Debug, serde::Deserialize)]
        struct Pet {
            #[allow(dead_code)]
            name: String,
        }
        let ctx = ctx_for(Request::post("/pets").with_body("{not json"));
        let err = ctx.bind_json::<Pet>().unwrap_err();
        let http = err.downcast_ref::<HttpError>().unwrap();
        assert_eq!(http.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_param_last_occurrence_wins() {
        let mut ctx = ctx_for(Request::get("/"));
        ctx.params_mut().push((Arc::from("id"), "org".to_string()));
        ctx.params_mut().push((Arc::from("id"), "user".to_string()));
        assert_eq!(ctx.param("id"), Some("user"));
    }
}
