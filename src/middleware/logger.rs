//! Request logging middleware.
//!
//! Emits one structured log line per request after the downstream chain
//! completes: method, path, status, and latency, inside the request-scoped
//! span (so the request ID appears automatically when the request-ID
//! middleware runs earlier in the chain).

use tokio::time::Instant;

use crate::context::Context;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// Request logger. Does not short-circuit; always delegates and logs the
/// outcome afterwards.
#[derive(Default)]
pub struct RequestLogger;

impl RequestLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestLogger {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.method().as_str().to_owned();
            let path = ctx.path().to_owned();

            let result = next.run(ctx.clone()).await;

            let latency = start.elapsed();
            let status = ctx.response_status().as_u16();
            ctx.logger().in_scope(|| match &result {
                Ok(()) => {
                    tracing::info!(%method, %path, status, ?latency, "request completed");
                }
                Err(error) => {
                    tracing::warn!(
                        %method,
                        %path,
                        status = error.status().as_u16(),
                        error = %error,
                        ?latency,
                        "request failed"
                    );
                }
            });

            result
        })
    }
}
