//! Gzip response compression.
//!
//! Runs the rest of the chain first, then compresses the buffered response
//! body when every eligibility gate holds: the client's `Accept-Encoding`
//! includes `gzip`, the response content type is in the configured set, the
//! body is at least the configured minimum length, no `Content-Encoding` is
//! already set, and the status allows a body. On compression the body is
//! replaced, `Content-Encoding: gzip` and an updated `Content-Length` are
//! set, and `Vary: Accept-Encoding` is added.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::context::Context;
use crate::error::HttpError;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// Gzip middleware. See the [module docs](self).
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::Gzip;
///
/// let gzip = Gzip::new().min_length(512).level(9);
/// ```
pub struct Gzip {
    level: u32,
    min_length: usize,
    content_types: Vec<String>,
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new()
    }
}

impl Gzip {
    /// Creates the middleware with level 6, a 1024-byte minimum, and the
    /// default eligible content types (`text/*`, `application/json`,
    /// `application/xml`, `application/javascript`).
    pub fn new() -> Self {
        Self {
            level: 6,
            min_length: 1024,
            content_types: vec![
                "text/*".to_owned(),
                "application/json".to_owned(),
                "application/xml".to_owned(),
                "application/javascript".to_owned(),
            ],
        }
    }

    /// Sets the compression level (0–9).
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Sets the minimum body length eligible for compression.
    #[must_use]
    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Replaces the eligible content-type set. Entries ending in `*` match
    /// by prefix (e.g. `text/*`).
    #[must_use]
    pub fn content_types(mut self, content_types: Vec<String>) -> Self {
        self.content_types = content_types;
        self
    }

    fn type_eligible(&self, content_type: &str) -> bool {
        // Strip parameters: "text/html; charset=utf-8" → "text/html".
        let mime = content_type.split(';').next().unwrap_or("").trim();
        self.content_types.iter().any(|entry| {
            match entry.strip_suffix('*') {
                Some(prefix) => mime.starts_with(prefix),
                None => mime == entry,
            }
        })
    }
}

fn compress(body: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(body)?;
    encoder.finish()
}

impl Middleware for Gzip {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let level = self.level;
        let min_length = self.min_length;
        let content_types = self.content_types.clone();

        Box::pin(async move {
            let accepts = ctx.request().accepts_gzip();
            next.run(ctx.clone()).await?;

            if !accepts {
                return Ok(());
            }

            let gate = Gzip {
                level,
                min_length,
                content_types,
            };

            let compressed: Option<Vec<u8>> = ctx.with_response(|response| {
                if response.status().is_bodyless() {
                    return None;
                }
                if response.headers().contains("content-encoding") {
                    return None;
                }
                if response.body_ref().len() < gate.min_length {
                    return None;
                }
                let eligible = response
                    .headers()
                    .get("content-type")
                    .is_some_and(|ct| gate.type_eligible(ct));
                if !eligible {
                    return None;
                }
                compress(response.body_ref(), gate.level).ok()
            });

            if let Some(compressed) = compressed {
                ctx.with_response(|response| {
                    response.set_header("Content-Encoding", "gzip");
                    response.set_header("Content-Length", compressed.len().to_string());
                    let already_varies = response
                        .headers()
                        .get_all("vary")
                        .any(|v| v.eq_ignore_ascii_case("accept-encoding"));
                    if !already_varies {
                        response.add_header("Vary", "Accept-Encoding");
                    }
                    response.set_body(compressed);
                });
            }
            Ok::<(), HttpError>(())
        })
    }
}
