use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::{codes, ErrorBody};

pub(crate) const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");
pub(crate) const TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

/// Response handed back to the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Serialize `value` as JSON. A serialization failure yields a 500.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut res = Self::new(status);
                res.headers.insert(CONTENT_TYPE, APPLICATION_JSON);
                res.body = body;
                res
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize JSON response body");
                Self::internal_error()
            }
        }
    }

    /// Engine-generated error with the standard `{"code", "message"}` body.
    #[must_use]
    pub fn error(status: StatusCode, code: &str, message: &str) -> Self {
        Self::json(status, &ErrorBody::new(code, message))
    }

    #[must_use]
    pub fn internal_error() -> Self {
        // Hand-written so the fallback can never fail to serialize.
        let mut res = Self::new(StatusCode::INTERNAL_SERVER_ERROR);
        res.headers.insert(CONTENT_TYPE, APPLICATION_JSON);
        res.body = format!(
            r#"{{"code":"{}","message":"Internal server error"}}"#,
            codes::INTERNAL_SERVER_ERROR
        )
        .into_bytes();
        res
    }

    #[must_use]
    pub fn text(status: StatusCode, body: &str) -> Self {
        let mut res = Self::new(status);
        res.headers.insert(CONTENT_TYPE, TEXT_PLAIN);
        res.body = body.as_bytes().to_vec();
        res
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Insert or replace a header. Invalid names or values are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }

    /// Decode the body as JSON.
    pub fn json_body(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }

    /// Body as UTF-8 text (lossy).
    #[must_use]
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Clear status, headers and body, keeping allocated capacity.
    pub(crate) fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.body.clear();
    }
}
