//! CORS middleware — validates the `Origin` header, handles preflight
//! requests, and injects `Access-Control-*` headers on actual responses.
//!
//! # Behavior
//!
//! - If no `Origin` header is present the request passes through unmodified.
//! - If the origin is not in the allow-list the request passes through unmodified.
//! - `OPTIONS` preflight requests are short-circuited with `204 No Content` and the
//!   appropriate `Access-Control-*` headers; the downstream handler is **not** called.
//! - For all other requests the handler runs normally and the CORS headers are appended
//!   to the response.
//! - When the wildcard origin `"*"` is used, a `Vary: Origin` header is **not** added;
//!   for specific origins it is added to ensure correct cache behavior.

use crate::context::Context;
use crate::http::Method;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// CORS middleware, configured through builder methods.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::Cors;
///
/// let cors = Cors::new()
///     .allow_origin("https://example.com")
///     .allow_method("PATCH")
///     .allow_header("X-Custom-Header")
///     .expose_header("X-Request-ID")
///     .allow_credentials(true)
///     .max_age(7200);
/// ```
pub struct Cors {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    exposed_headers: Vec<String>,
    allow_credentials: bool,
    max_age: u64,
}

impl Default for Cors {
    fn default() -> Self {
        Self::new()
    }
}

impl Cors {
    /// Creates the middleware with permissive defaults:
    ///
    /// | Setting           | Default value                    |
    /// |-------------------|----------------------------------|
    /// | Allowed origins   | `*` (all origins)                |
    /// | Allowed methods   | `GET`, `POST`, `PUT`, `DELETE`   |
    /// | Allowed headers   | `Content-Type`, `Authorization`  |
    /// | Exposed headers   | *(none)*                         |
    /// | Credentials       | disabled                         |
    /// | Max age           | 3600 seconds                     |
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_owned()],
            allowed_methods: vec![
                "GET".to_owned(),
                "POST".to_owned(),
                "PUT".to_owned(),
                "DELETE".to_owned(),
            ],
            allowed_headers: vec!["Content-Type".to_owned(), "Authorization".to_owned()],
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age: 3600,
        }
    }

    /// Adds an allowed origin. The first non-wildcard origin added replaces
    /// the default `*` allow-list.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if self.allowed_origins == ["*"] {
            self.allowed_origins.clear();
        }
        self.allowed_origins.push(origin.into());
        self
    }

    /// Adds an allowed HTTP method for preflight responses.
    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    /// Adds an allowed request header for preflight responses.
    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// Adds a header exposed to browser scripts via
    /// `Access-Control-Expose-Headers`.
    #[must_use]
    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.exposed_headers.push(header.into());
        self
    }

    /// Enables `Access-Control-Allow-Credentials`.
    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Sets `Access-Control-Max-Age` in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }
}

impl Middleware for Cors {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let allowed_origins = self.allowed_origins.clone();
        let allowed_methods = self.allowed_methods.clone();
        let allowed_headers = self.allowed_headers.clone();
        let exposed_headers = self.exposed_headers.clone();
        let allow_credentials = self.allow_credentials;
        let max_age = self.max_age;

        Box::pin(async move {
            let request_origin = ctx.header("origin").map(str::to_owned);
            let is_preflight = ctx.method() == &Method::Options;
            let Some(origin) = request_origin else {
                return next.run(ctx).await;
            };

            let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
                "*".to_owned()
            } else if allowed_origins.contains(&origin) {
                origin.clone()
            } else {
                return next.run(ctx).await;
            };

            let methods_str = allowed_methods.join(", ");
            let headers_str = allowed_headers.join(", ");
            let is_wildcard = allow_origin == "*";

            ctx.set_header("Access-Control-Allow-Origin", allow_origin.as_str());
            if allow_credentials {
                ctx.set_header("Access-Control-Allow-Credentials", "true");
            }
            if !is_wildcard {
                ctx.add_header("Vary", "Origin");
            }

            if is_preflight {
                ctx.set_header("Access-Control-Allow-Methods", methods_str.as_str());
                ctx.set_header("Access-Control-Allow-Headers", headers_str.as_str());
                ctx.set_header("Access-Control-Max-Age", max_age.to_string());
                return ctx.no_content();
            }

            if !exposed_headers.is_empty() {
                ctx.set_header("Access-Control-Expose-Headers", exposed_headers.join(", "));
            }
            next.run(ctx).await
        })
    }
}
