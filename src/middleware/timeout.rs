//! Timeout middleware.
//!
//! Wraps the remainder of the chain in a deadline. A child cancellation
//! token is derived and installed on the context before `next` runs, so
//! cooperative handlers can observe the narrower deadline via
//! [`Context::cancellation`]. When the deadline fires first, the middleware
//! writes a `503 Service Unavailable` (or runs the configured error
//! handler), unless the response is already committed, and returns the
//! deadline-exceeded sentinel.

use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::HttpError;
use crate::http::StatusCode;
use crate::middleware::{Message, Middleware, MiddlewareFuture, Next};

type TimeoutHandler = Arc<dyn Fn(&Context) + Send + Sync>;

/// Deadline middleware. See the [module docs](self).
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use trellis::middleware::Timeout;
///
/// let timeout = Timeout::new(Duration::from_millis(500))
///     .message("upstream took too long");
/// ```
pub struct Timeout {
    duration: Duration,
    message: Message,
    error_handler: Option<TimeoutHandler>,
}

impl Timeout {
    /// Creates the middleware with the given deadline and the default
    /// `Service Unavailable` message.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            message: Message::from("Service Unavailable"),
            error_handler: None,
        }
    }

    /// Overrides the message written on deadline, either a string or a
    /// function of the context via [`Message::from_fn`].
    #[must_use]
    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.message = message.into();
        self
    }

    /// Replaces the default timeout response writer entirely.
    #[must_use]
    pub fn error_handler(mut self, handler: impl Fn(&Context) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}

impl Middleware for Timeout {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let duration = self.duration;
        let message = self.message.clone();
        let error_handler = self.error_handler.clone();

        Box::pin(async move {
            let deadline = ctx.derive_deadline(duration);

            match tokio::time::timeout(duration, next.run(ctx.clone())).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    deadline.cancel();
                    // A committed response is never rewritten; the sentinel
                    // alone reaches the error pipeline.
                    if !ctx.response_committed() {
                        match &error_handler {
                            Some(handler) => handler(&ctx),
                            None => {
                                let body = message.resolve(&ctx);
                                let _ = ctx.string(StatusCode::ServiceUnavailable, body);
                            }
                        }
                    }
                    Err(HttpError::timeout())
                }
            }
        })
    }
}
