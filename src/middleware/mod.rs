//! Middleware pipeline — composable before/after request handler logic.
//!
//! A middleware is a handler transformer: it receives the per-request
//! [`Context`] and a [`Next`] cursor into the remainder of the chain. It may
//! pass through (`next.run(ctx).await`), short-circuit (return without
//! calling `next` — an `Err` reaches the global error handler, an `Ok`
//! leaves whatever response the middleware wrote), or decorate the response
//! after `next` returns.
//!
//! Chains are composed per request by the dispatcher in a fixed order:
//! global middleware in registration order, then group middleware from the
//! outermost group inward, then route middleware, then the terminal handler.
//! `Next` is consumed by [`Next::run`], so a middleware cannot invoke the
//! remainder of its chain twice.
//!
//! Built-in middleware lives in the submodules: [`request_id`], [`timeout`],
//! [`cors`], [`csrf`], [`rate_limit`], [`gzip`], [`basic_auth`], [`logger`],
//! and [`recovery`].

pub mod basic_auth;
pub mod cors;
pub mod csrf;
pub mod gzip;
pub mod logger;
pub mod rate_limit;
pub mod recovery;
pub mod request_id;
pub mod timeout;

pub use basic_auth::BasicAuth;
pub use cors::Cors;
pub use csrf::Csrf;
pub use gzip::Gzip;
pub use logger::RequestLogger;
pub use rate_limit::{LimiterStore, MemoryStore, RateLimit};
pub use recovery::Recovery;
pub use request_id::RequestId;
pub use timeout::Timeout;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::HttpError;
use crate::router::Handler;

/// The boxed future every middleware and handler returns.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = Result<(), HttpError>> + Send>>;

/// The core trait for all trellis middleware.
///
/// Implementations must be `Send + Sync`: middleware is registered once and
/// shared across all request tasks.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::{Middleware, MiddlewareFuture, Next};
/// use trellis::Context;
///
/// struct ServerHeader;
///
/// impl Middleware for ServerHeader {
///     fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
///         Box::pin(async move {
///             ctx.set_header("Server", "trellis");
///             next.run(ctx).await
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the rest of the chain.
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture;
}

/// A cursor into the remaining middleware chain for a single request.
///
/// Calling [`run`](Self::run) advances the cursor by one position and
/// invokes the next middleware; when the middleware list is exhausted it
/// invokes the terminal handler. `Next` is consumed on each call, so the
/// remainder of a chain cannot be run twice from the same position.
pub struct Next {
    chain: Vec<Arc<dyn Middleware>>,
    index: usize,
    terminal: Handler,
}

impl Next {
    /// Creates a cursor positioned at the start of `chain`, terminating in
    /// `terminal`.
    pub(crate) fn new(chain: Vec<Arc<dyn Middleware>>, terminal: Handler) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
        }
    }

    /// Invokes the next element of the chain and returns its outcome.
    pub async fn run(mut self, ctx: Context) -> Result<(), HttpError> {
        if self.index < self.chain.len() {
            let middleware = self.chain[self.index].clone();
            self.index += 1;
            middleware.handle(ctx, self).await
        } else {
            (self.terminal)(ctx).await
        }
    }
}

/// A configurable response message: either a static string or a function of
/// the request context. Used by middleware that writes its own failure
/// responses (timeout, rate limiter).
#[derive(Clone)]
pub enum Message {
    Static(String),
    Dynamic(Arc<dyn Fn(&Context) -> String + Send + Sync>),
}

impl Message {
    /// Resolves the message for the given request.
    pub fn resolve(&self, ctx: &Context) -> String {
        match self {
            Self::Static(s) => s.clone(),
            Self::Dynamic(f) => f(ctx),
        }
    }

    /// Builds a dynamic message from a function of the context.
    pub fn from_fn(f: impl Fn(&Context) -> String + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Static(s.to_owned())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

/// Wraps a closure as a [`Middleware`].
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::from_fn;
///
/// let tag = from_fn(|ctx: trellis::Context, next| async move {
///     ctx.set_header("X-Tagged", "yes");
///     next.run(ctx).await
/// });
/// ```
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HttpError>> + Send + 'static,
{
    struct FnMiddleware<F>(F);

    impl<F, Fut> Middleware for FnMiddleware<F>
    where
        F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HttpError>> + Send + 'static,
    {
        fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
            Box::pin((self.0)(ctx, next))
        }
    }

    Arc::new(FnMiddleware(f))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::context::pool;
    use crate::http::StatusCode;
    use parking_lot::Mutex;

    fn recording(order: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn Middleware> {
        from_fn(move |ctx, next| {
            let order = order.clone();
            async move {
                order.lock().push(tag);
                next.run(ctx).await
            }
        })
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            recording(order.clone(), "first"),
            recording(order.clone(), "second"),
            recording(order.clone(), "third"),
        ];
        let (ctx, outcome) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            chain,
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn terminal_runs_when_nothing_short_circuits() {
        let (ctx, outcome) =
            run_chain(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", Vec::new(), ok_handler()).await;
        assert!(outcome.is_ok());
        assert_eq!(ctx.response_status(), StatusCode::Ok);
        assert!(ctx.response_committed());
        pool::release(ctx);
    }

    #[tokio::test]
    async fn short_circuit_skips_downstream() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let blocker: Arc<dyn Middleware> = from_fn(|ctx, _next| async move {
            ctx.string(StatusCode::Forbidden, "stop")
        });
        let chain = vec![blocker, recording(order.clone(), "downstream")];
        let (ctx, outcome) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            chain,
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        assert!(order.lock().is_empty());
        assert_eq!(ctx.response_status(), StatusCode::Forbidden);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn error_short_circuit_propagates() {
        let failing: Arc<dyn Middleware> = from_fn(|_ctx, _next| async move {
            Err(HttpError::new(StatusCode::Unauthorized))
        });
        let (ctx, outcome) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            vec![failing],
            ok_handler(),
        )
        .await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Unauthorized);
        assert!(!ctx.response_committed());
        pool::release(ctx);
    }

    #[tokio::test]
    async fn middleware_can_decorate_after_next() {
        let decorator: Arc<dyn Middleware> = from_fn(|ctx: Context, next: Next| async move {
            let result = next.run(ctx.clone()).await;
            ctx.set_header("X-Decorated", "yes");
            result
        });
        let (ctx, outcome) = run_chain(
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            vec![decorator],
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        let response = ctx.take_response();
        assert_eq!(response.headers().get("x-decorated"), Some("yes"));
        pool::release(ctx);
    }
}
