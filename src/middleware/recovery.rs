//! Panic recovery middleware.
//!
//! Catches panics from any downstream middleware or the terminal handler
//! and converts them into a `500` structured error whose cause carries the
//! panic payload, handing the rest to the global error handler. The stack
//! is captured into the server-side log, never the client response.
//!
//! The dispatcher itself also recovers panics as a last resort; installing
//! `Recovery` earlier in the chain lets decorating middleware (e.g. the
//! request logger) observe the converted error instead of unwinding past it.

use std::any::Any;
use std::backtrace::Backtrace;

use futures_util::FutureExt;
use thiserror::Error;

use crate::context::Context;
use crate::error::HttpError;
use crate::http::StatusCode;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// The panic payload preserved as an error cause.
#[derive(Debug, Error)]
#[error("panic: {0}")]
pub struct PanicPayload(pub String);

/// Renders a panic payload (usually `&str` or `String`) into an [`HttpError`].
pub(crate) fn panic_to_error(payload: Box<dyn Any + Send>) -> HttpError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    };

    let backtrace = Backtrace::force_capture();
    tracing::error!(panic = %message, backtrace = %backtrace, "handler panicked");

    HttpError::new(StatusCode::InternalServerError).with_cause(PanicPayload(message))
}

/// Panic-recovery middleware. See the [module docs](self).
#[derive(Default)]
pub struct Recovery;

impl Recovery {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for Recovery {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        Box::pin(async move {
            match std::panic::AssertUnwindSafe(next.run(ctx))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => Err(panic_to_error(payload)),
            }
        })
    }
}
