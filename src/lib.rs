//! # trellis
//!
//! An async HTTP/1.1 server framework: radix-tree routing with path
//! parameters and catch-alls, pooled per-request contexts, a composable
//! middleware pipeline, and a centralized error/panic pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellis::{Context, Router, Server, StatusCode};
//! use trellis::middleware::{RequestId, RequestLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     trellis::lifecycle::init_logging(Default::default());
//!
//!     let mut router = Router::new();
//!     router.use_middleware(Arc::new(RequestId::new()));
//!     router.use_middleware(Arc::new(RequestLogger::new()));
//!
//!     router.get("/users/:id", |ctx: Context| async move {
//!         let id = ctx.param("id").unwrap_or("unknown").to_owned();
//!         ctx.json(StatusCode::Ok, &serde_json::json!({ "id": id }))
//!     });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server.run(Arc::new(router)).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod middleware;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use context::{Context, Store};
pub use error::{ErrorMessage, HttpError, ValidationError};
pub use http::{Cookie, Headers, Method, Request, Response, SameSite, StatusCode};
pub use lifecycle::Mode;
pub use router::{Group, Handler, HtmlRenderer, IntoHandler, Router};
pub use server::{Server, ServerError};
