use http::{Method, StatusCode};
use std::sync::Arc;
use tracing::debug;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

/// CORS configuration error
///
/// Returned by [`CorsBuilder::build`] when the configuration violates CORS
/// requirements.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorsConfigError {
    /// Wildcard origin (`*`) cannot be used with credentials
    #[error("cannot use wildcard origin (*) with credentials; list exact origins instead")]
    WildcardWithCredentials,
    /// Origin is not `scheme://host[:port]`
    #[error("invalid origin format '{origin}', expected scheme://host[:port]")]
    InvalidOriginFormat { origin: String },
}

/// Origin validation strategy
#[derive(Clone)]
pub enum OriginValidation {
    /// Exact string matching
    Exact(Vec<String>),
    /// Wildcard (allow all origins)
    Wildcard,
    /// Custom validation function
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginValidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OriginValidation::Exact(origins) => f.debug_tuple("Exact").field(origins).finish(),
            OriginValidation::Wildcard => write!(f, "Wildcard"),
            OriginValidation::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

impl OriginValidation {
    fn is_allowed(&self, origin: &str) -> bool {
        match self {
            OriginValidation::Exact(origins) => origins.iter().any(|o| o == origin),
            OriginValidation::Wildcard => true,
            OriginValidation::Custom(validator) => validator(origin),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) middleware
///
/// `OPTIONS` requests are treated as preflights: the allow headers are
/// written and the chain short-circuits with 204. Other requests get the
/// allow-origin, credentials and expose headers, then continue.
///
/// Preflights only reach the middleware when an `OPTIONS` route matches the
/// path; register one (a `/*path` catch-all works) in the group that carries
/// this middleware.
///
/// # Example
///
/// ```rust,ignore
/// use neurite::middleware::Cors;
/// use http::Method;
///
/// let cors = Cors::builder()
///     .allowed_origins(&["https://example.com"])
///     .allowed_methods(&[Method::GET, Method::POST])
///     .allow_credentials(true)
///     .max_age(3600)
///     .build()?;
/// ```
#[derive(Debug, Clone)]
pub struct Cors {
    origins: OriginValidation,
    allowed_methods: String,
    allowed_headers: String,
    expose_headers: Option<String>,
    allow_credentials: bool,
    max_age: Option<u32>,
}

impl Cors {
    pub fn builder() -> CorsBuilder {
        CorsBuilder::new()
    }

    /// Value for `Access-Control-Allow-Origin`, if the origin is allowed.
    fn allow_origin<'o>(&self, origin: Option<&'o str>) -> Option<&'o str> {
        match (&self.origins, origin) {
            (OriginValidation::Wildcard, None) => Some("*"),
            (_, Some(origin)) if self.origins.is_allowed(origin) => Some(origin),
            _ => None,
        }
    }
}

impl Middleware for Cors {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        let origin = ctx.header("origin").map(str::to_string);
        let allowed = self.allow_origin(origin.as_deref()).map(str::to_string);

        if let Some(value) = &allowed {
            ctx.set_header("access-control-allow-origin", value)?;
            if origin.is_some() && !matches!(self.origins, OriginValidation::Wildcard) {
                ctx.set_header("vary", "Origin")?;
            }
            if self.allow_credentials {
                ctx.set_header("access-control-allow-credentials", "true")?;
            }
        } else if let Some(origin) = &origin {
            debug!(origin = %origin, "CORS origin not allowed");
        }

        if ctx.method() == Method::OPTIONS {
            ctx.set_header("access-control-allow-methods", &self.allowed_methods)?;
            ctx.set_header("access-control-allow-headers", &self.allowed_headers)?;
            if let Some(max_age) = self.max_age {
                ctx.set_header("access-control-max-age", &max_age.to_string())?;
            }
            return ctx.no_content(StatusCode::NO_CONTENT);
        }

        if allowed.is_some() {
            if let Some(expose) = &self.expose_headers {
                ctx.set_header("access-control-expose-headers", expose)?;
            }
        }
        next.run(ctx)
    }

    fn name(&self) -> &'static str {
        "cors"
    }
}

/// Builder for [`Cors`] with a fluent API
pub struct CorsBuilder {
    origins: Option<OriginValidation>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
    allow_credentials: bool,
    expose_headers: Vec<String>,
    max_age: Option<u32>,
}

impl Default for CorsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CorsBuilder {
    /// Create a new builder with secure defaults
    ///
    /// No origins, `Content-Type` and `Authorization` headers,
    /// `GET, POST, PUT, DELETE, OPTIONS`, no credentials, no preflight caching.
    pub fn new() -> Self {
        Self {
            origins: None,
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ],
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: None,
        }
    }

    /// Set allowed origins; `&["*"]` allows every origin.
    pub fn allowed_origins(mut self, origins: &[&str]) -> Self {
        self.origins = Some(if origins.contains(&"*") {
            OriginValidation::Wildcard
        } else {
            OriginValidation::Exact(origins.iter().map(|s| s.to_string()).collect())
        });
        self
    }

    pub fn origin_validator<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.origins = Some(OriginValidation::Custom(Arc::new(f)));
        self
    }

    pub fn allowed_methods(mut self, methods: &[Method]) -> Self {
        self.allowed_methods = methods.to_vec();
        self
    }

    pub fn allowed_headers(mut self, headers: &[&str]) -> Self {
        self.allowed_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// When enabled, sets `Access-Control-Allow-Credentials: true`.
    /// Cannot be combined with a wildcard origin.
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn expose_headers(mut self, headers: &[&str]) -> Self {
        self.expose_headers = headers.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Preflight cache duration in seconds.
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn build(self) -> Result<Cors, CorsConfigError> {
        let origins = self
            .origins
            .unwrap_or_else(|| OriginValidation::Exact(Vec::new()));

        match &origins {
            OriginValidation::Wildcard if self.allow_credentials => {
                return Err(CorsConfigError::WildcardWithCredentials)
            }
            OriginValidation::Exact(list) => {
                if let Some(bad) = list.iter().find(|o| !is_valid_origin(o)) {
                    return Err(CorsConfigError::InvalidOriginFormat {
                        origin: bad.clone(),
                    });
                }
            }
            _ => {}
        }

        Ok(Cors {
            origins,
            allowed_methods: self
                .allowed_methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(","),
            allowed_headers: self.allowed_headers.join(","),
            expose_headers: (!self.expose_headers.is_empty())
                .then(|| self.expose_headers.join(",")),
            allow_credentials: self.allow_credentials,
            max_age: self.max_age,
        })
    }
}

fn is_valid_origin(origin: &str) -> bool {
    match url::Url::parse(origin) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some()
                && url.path() == "/"
                && !origin.ends_with('/')
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_with_credentials_rejected() {
        let err = Cors::builder()
            .allowed_origins(&["*"])
            .allow_credentials(true)
            .build()
            .unwrap_err();
        assert_eq!(err, CorsConfigError::WildcardWithCredentials);
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let err = Cors::builder()
            .allowed_origins(&["example.com"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CorsConfigError::InvalidOriginFormat { .. }));
        assert!(Cors::builder()
            .allowed_origins(&["https://example.com:8443"])
            .build()
            .is_ok());
    }

    #[test]
    fn test_allow_origin_resolution() {
        let cors = Cors::builder()
            .allowed_origins(&["https://a.example"])
            .build()
            .unwrap();
        assert_eq!(
            cors.allow_origin(Some("https://a.example")),
            Some("https://a.example")
        );
        assert_eq!(cors.allow_origin(Some("https://b.example")), None);
        assert_eq!(cors.allow_origin(None), None);
    }
}
