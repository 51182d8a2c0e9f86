use std::collections::BTreeMap;

use super::{HandlerResult, Middleware, Next};
use crate::context::Context;

/// Adds browser security headers to every response.
///
/// Headers are written before the inner layers run, so a handler can still
/// override any of them.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    hsts: Option<String>,
    frame_options: Option<String>,
    content_type_options: Option<String>,
    xss_protection: Option<String>,
    csp: BTreeMap<String, Vec<String>>,
}

impl Default for SecurityHeaders {
    /// `nosniff`, `DENY` framing and `1; mode=block`; no HSTS, no CSP.
    fn default() -> Self {
        Self {
            hsts: None,
            frame_options: Some("DENY".into()),
            content_type_options: Some("nosniff".into()),
            xss_protection: Some("1; mode=block".into()),
            csp: BTreeMap::new(),
        }
    }
}

impl SecurityHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable `Strict-Transport-Security`.
    #[must_use]
    pub fn hsts(mut self, max_age_secs: u64, include_subdomains: bool) -> Self {
        let mut value = format!("max-age={max_age_secs}");
        if include_subdomains {
            value.push_str("; includeSubDomains");
        }
        self.hsts = Some(value);
        self
    }

    /// `DENY`, `SAMEORIGIN`, or `None` to omit the header.
    #[must_use]
    pub fn frame_options(mut self, value: Option<&str>) -> Self {
        self.frame_options = value.map(str::to_string);
        self
    }

    #[must_use]
    pub fn content_type_options(mut self, value: Option<&str>) -> Self {
        self.content_type_options = value.map(str::to_string);
        self
    }

    #[must_use]
    pub fn xss_protection(mut self, value: Option<&str>) -> Self {
        self.xss_protection = value.map(str::to_string);
        self
    }

    /// Add sources for one CSP directive, e.g. `("script-src", &["'self'"])`.
    #[must_use]
    pub fn csp_directive(mut self, directive: &str, sources: &[&str]) -> Self {
        self.csp
            .entry(directive.to_string())
            .or_default()
            .extend(sources.iter().map(|s| s.to_string()));
        self
    }

    /// Rendered `Content-Security-Policy` value, directives in name order.
    pub fn csp_header(&self) -> Option<String> {
        if self.csp.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .csp
            .iter()
            .map(|(directive, sources)| {
                if sources.is_empty() {
                    directive.clone()
                } else {
                    format!("{directive} {}", sources.join(" "))
                }
            })
            .collect();
        Some(parts.join("; "))
    }
}

impl Middleware for SecurityHeaders {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> HandlerResult {
        if let Some(v) = &self.hsts {
            ctx.set_header("strict-transport-security", v)?;
        }
        if let Some(v) = &self.frame_options {
            ctx.set_header("x-frame-options", v)?;
        }
        if let Some(v) = &self.content_type_options {
            ctx.set_header("x-content-type-options", v)?;
        }
        if let Some(v) = &self.xss_protection {
            ctx.set_header("x-xss-protection", v)?;
        }
        if let Some(csp) = self.csp_header() {
            ctx.set_header("content-security-policy", &csp)?;
        }
        next.run(ctx)
    }

    fn name(&self) -> &'static str {
        "security_headers"
    }
}
