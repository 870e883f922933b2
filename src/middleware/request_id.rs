//! Request-ID middleware.
//!
//! Propagates a caller-supplied request ID or generates one, stores it in
//! the context store under [`REQUEST_ID_KEY`], echoes it in the response
//! header, and enriches the request-scoped logger span so every log line of
//! the request carries the ID.

use std::sync::Arc;

use uuid::Uuid;

use crate::context::Context;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// Store key under which the request ID is published.
pub const REQUEST_ID_KEY: &str = "request_id";

/// Default header consulted and echoed.
pub const DEFAULT_HEADER: &str = "X-Request-ID";

type Generator = Arc<dyn Fn() -> String + Send + Sync>;

/// Request-ID middleware. See the [module docs](self).
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::RequestId;
///
/// let rid = RequestId::new();
/// let custom = RequestId::new()
///     .header_name("X-Correlation-ID")
///     .generator(|| "fixed".to_owned());
/// ```
pub struct RequestId {
    header_name: String,
    generator: Generator,
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    /// Creates the middleware with the [`DEFAULT_HEADER`] and a UUIDv4
    /// generator.
    pub fn new() -> Self {
        Self {
            header_name: DEFAULT_HEADER.to_owned(),
            generator: Arc::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Overrides the header read from the request and written to the response.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Overrides the ID generator used when the request carries none.
    #[must_use]
    pub fn generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generator = Arc::new(generator);
        self
    }
}

impl Middleware for RequestId {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let header_name = self.header_name.clone();
        let generator = self.generator.clone();

        Box::pin(async move {
            let id = match ctx.header(&header_name) {
                Some(id) if !id.is_empty() => id.to_owned(),
                _ => generator(),
            };

            ctx.set(REQUEST_ID_KEY, id.clone());
            ctx.set_header(header_name.as_str(), id.as_str());

            let span = tracing::info_span!(parent: &ctx.logger(), "request_id", request_id = %id);
            ctx.set_logger(span);

            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::pool;
    use crate::middleware::test_support::{ok_handler, run_chain};

    #[tokio::test]
    async fn echoes_incoming_id() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RequestId::new())];
        let (ctx, outcome) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\nX-Request-ID: req-123\r\n\r\n",
            chain,
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        assert_eq!(
            ctx.store().get_string(REQUEST_ID_KEY).as_deref(),
            Some("req-123")
        );
        let response = ctx.take_response();
        assert_eq!(response.headers().get("x-request-id"), Some("req-123"));
        pool::release(ctx);
    }

    #[tokio::test]
    async fn generates_id_when_absent() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RequestId::new())];
        let (ctx, outcome) =
            run_chain(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", chain, ok_handler()).await;
        assert!(outcome.is_ok());
        let id = ctx.store().get_string(REQUEST_ID_KEY).unwrap();
        assert!(!id.is_empty());
        let response = ctx.take_response();
        assert_eq!(response.headers().get("x-request-id"), Some(id.as_str()));
        pool::release(ctx);
    }

    #[tokio::test]
    async fn custom_header_and_generator() {
        let rid = RequestId::new()
            .header_name("X-Correlation-ID")
            .generator(|| "generated-1".to_owned());
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(rid)];
        let (ctx, _) =
            run_chain(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", chain, ok_handler()).await;
        assert_eq!(
            ctx.store().get_string(REQUEST_ID_KEY).as_deref(),
            Some("generated-1")
        );
        let response = ctx.take_response();
        assert_eq!(
            response.headers().get("x-correlation-id"),
            Some("generated-1")
        );
        pool::release(ctx);
    }

    #[tokio::test]
    async fn empty_incoming_header_is_regenerated() {
        let rid = RequestId::new().generator(|| "fresh".to_owned());
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(rid)];
        let (ctx, _) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\nX-Request-ID: \r\n\r\n",
            chain,
            ok_handler(),
        )
        .await;
        assert_eq!(
            ctx.store().get_string(REQUEST_ID_KEY).as_deref(),
            Some("fresh")
        );
        pool::release(ctx);
    }
}
