//! Request routing and dispatch.
//!
//! [`Router`] maps URL patterns and HTTP methods to handler functions via a
//! radix [tree]. Three segment styles are supported:
//!
//! | Pattern              | Example match              | Captured params   |
//! |----------------------|----------------------------|-------------------|
//! | `/users`             | `/users`                   | *(none)*          |
//! | `/users/:id`         | `/users/42`                | `id → "42"`       |
//! | `/files/*rest`       | `/files/docs/readme.txt`   | `rest → "docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Static segments beat parameters and parameters beat catch-alls when
//! several routes could match.
//!
//! The router is also the request dispatcher: [`Router::dispatch`] acquires
//! a pooled [`Context`], resolves the route, composes the middleware chain
//! (globals, then group, then route, then the terminal handler), executes
//! it, and translates the outcome — success, [`HttpError`], or panic — into
//! an HTTP response through the replaceable global error handler.

pub mod tree;

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;

use crate::context::{Context, pool};
use crate::error::{ErrorMessage, HttpError};
use crate::http::{Method, Request, Response, StatusCode};
use crate::lifecycle::{self, Mode};
use crate::middleware::{Middleware, MiddlewareFuture, Next};
use tree::{RouteMatch, RouteTree};

/// Type-erased, heap-allocated async handler that processes a [`Context`]
/// and either writes a response through it or fails with an [`HttpError`].
pub type Handler = Arc<dyn Fn(Context) -> MiddlewareFuture + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Result<(), HttpError>> + Send`
/// that is also `Send + Sync + 'static` implements this trait automatically
/// via the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> MiddlewareFuture;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), HttpError>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> MiddlewareFuture {
        Box::pin((self)(ctx))
    }
}

/// Erases a concrete handler into the shared [`Handler`] type.
pub fn erase(handler: impl IntoHandler) -> Handler {
    let handler = Arc::new(handler);
    Arc::new(move |ctx| handler.call(ctx))
}

/// Pluggable HTML template renderer consumed by [`Context::render`].
pub trait HtmlRenderer: Send + Sync {
    /// Renders the named template against `data`.
    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, HttpError>;
}

/// The global error handler: translates an [`HttpError`] into an HTTP
/// response written through the context. Only invoked when the response is
/// not yet committed.
pub type ErrorHandler = Arc<dyn Fn(&Context, &HttpError) + Send + Sync>;

/// A registered route target: terminal handler plus the middleware recorded
/// for it at registration (group middleware outer-to-inner, then
/// route-specific middleware).
struct RouteTarget {
    handler: Handler,
    middleware: Vec<Arc<dyn Middleware>>,
}

/// HTTP request router and dispatcher.
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::{Router, StatusCode};
///
/// let mut router = Router::new();
///
/// router.get("/ping", |ctx: trellis::Context| async move {
///     ctx.string(StatusCode::Ok, "pong")
/// });
///
/// router.get("/users/:id", |ctx: trellis::Context| async move {
///     let id = ctx.param("id").unwrap_or("unknown").to_owned();
///     ctx.string(StatusCode::Ok, id)
/// });
/// ```
pub struct Router {
    tree: RouteTree<RouteTarget>,
    globals: Vec<Arc<dyn Middleware>>,
    error_handler: ErrorHandler,
    not_found: Handler,
    renderer: Option<Arc<dyn HtmlRenderer>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates an empty router with the default error and not-found handlers.
    pub fn new() -> Self {
        Self {
            tree: RouteTree::new(),
            globals: Vec::new(),
            error_handler: Arc::new(default_error_handler),
            not_found: erase(|_ctx: Context| async move {
                Err(HttpError::new(StatusCode::NotFound))
            }),
            renderer: None,
        }
    }

    /// Appends a global middleware, run for every request (including 404 and
    /// 405 dispatch) in registration order.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.globals.push(middleware);
    }

    /// Replaces the global error handler.
    pub fn set_error_handler(&mut self, handler: impl Fn(&Context, &HttpError) + Send + Sync + 'static) {
        self.error_handler = Arc::new(handler);
    }

    /// Replaces the not-found handler.
    pub fn set_not_found(&mut self, handler: impl IntoHandler) {
        self.not_found = erase(handler);
    }

    /// Installs the HTML renderer exposed through [`Context::render`].
    pub fn set_renderer(&mut self, renderer: Arc<dyn HtmlRenderer>) {
        self.renderer = Some(renderer);
    }

    /// Registers `handler` for `(method, path)` with no route middleware.
    ///
    /// # Panics
    ///
    /// Panics on malformed patterns and duplicate registrations — route
    /// tables are program structure, not runtime input.
    pub fn add(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        self.add_with(method, path, handler, Vec::new());
    }

    /// Registers `handler` with route-specific middleware, run after global
    /// and group middleware.
    pub fn add_with(
        &mut self,
        method: Method,
        path: &str,
        handler: impl IntoHandler,
        middleware: Vec<Arc<dyn Middleware>>,
    ) {
        self.tree.insert(
            method,
            path,
            RouteTarget {
                handler: erase(handler),
                middleware,
            },
        );
    }

    /// Registers a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Get, path, handler);
    }

    /// Registers a handler for `POST` requests matching `path`.
    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Post, path, handler);
    }

    /// Registers a handler for `PUT` requests matching `path`.
    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Put, path, handler);
    }

    /// Registers a handler for `DELETE` requests matching `path`.
    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Delete, path, handler);
    }

    /// Registers a handler for `PATCH` requests matching `path`.
    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Patch, path, handler);
    }

    /// Registers a handler for `HEAD` requests matching `path`.
    pub fn head(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Head, path, handler);
    }

    /// Registers a handler for `OPTIONS` requests matching `path`.
    pub fn options(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Options, path, handler);
    }

    /// Opens a route group under `prefix`. Routes registered through the
    /// group inherit its prefix and middleware; nested groups compose
    /// outer-to-inner.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            router: self,
            prefix: prefix.trim_end_matches('/').to_owned(),
            middleware: Vec::new(),
        }
    }

    /// Dispatches one request to completion and returns the response to
    /// flush. This is the framework side of the HTTP engine boundary.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.path().to_owned();

        let (params, route_middleware, terminal) = match self.tree.find(&method, &path) {
            RouteMatch::Matched { value, params } => {
                (params, value.middleware.clone(), value.handler.clone())
            }
            RouteMatch::MethodNotAllowed { allowed } => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let terminal = erase(move |ctx: Context| {
                    let allow = allow.clone();
                    async move {
                        ctx.set_header("Allow", allow);
                        Err(HttpError::new(StatusCode::MethodNotAllowed))
                    }
                });
                (Vec::new(), Vec::new(), terminal)
            }
            RouteMatch::NotFound => (Vec::new(), Vec::new(), self.not_found.clone()),
        };

        let ctx = pool::acquire(request, params, self.renderer.clone());

        let chain: Vec<Arc<dyn Middleware>> = self
            .globals
            .iter()
            .cloned()
            .chain(route_middleware)
            .collect();

        // The chain runs under catch_unwind so a panicking handler is
        // converted into a 500 instead of tearing down the connection task.
        let outcome = std::panic::AssertUnwindSafe(Next::new(chain, terminal).run(ctx.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(crate::middleware::recovery::panic_to_error(payload)));

        if let Err(error) = outcome {
            self.handle_error(&ctx, &error);
        }

        let response = ctx.take_response();
        pool::release(ctx);
        response
    }

    /// Routes an error through the global error handler exactly once, gated
    /// by the commit-state oracle.
    fn handle_error(&self, ctx: &Context, error: &HttpError) {
        if ctx.response_committed() {
            ctx.logger().in_scope(|| {
                tracing::error!(
                    status = error.status().as_u16(),
                    error = %error,
                    "error after response was committed — not rewriting"
                );
            });
            return;
        }
        (self.error_handler)(ctx, error);
    }
}

/// The default global error handler.
///
/// Writes a response whose status is the error's code. The public message
/// renders as JSON (`{"error": …}`) when the request negotiates JSON,
/// otherwise as plain text. Internal causes appear in a diagnostic field in
/// debug mode only; they are always logged server-side.
fn default_error_handler(ctx: &Context, error: &HttpError) {
    let status = error.status();
    let internal = error.cause_chain();

    ctx.logger().in_scope(|| {
        tracing::error!(
            status = status.as_u16(),
            error = %error,
            internal = internal.as_deref().unwrap_or(""),
            "request failed"
        );
    });

    let debug = lifecycle::mode() == Mode::Debug;
    let message = error.message();

    if ctx.request().wants_json() {
        let mut body = match message {
            ErrorMessage::Text(text) => json!({ "error": text }),
            ErrorMessage::Json(value) => json!({ "error": value }),
        };
        if debug {
            if let Some(internal) = internal {
                body["internal"] = json!(internal);
            }
        }
        let bytes = serde_json::to_vec(&body).unwrap_or_default();
        ctx.write_error_body(status, "application/json; charset=utf-8", bytes);
    } else {
        let mut text = message.to_string();
        if debug {
            if let Some(internal) = internal {
                text.push_str("\ninternal: ");
                text.push_str(&internal);
            }
        }
        ctx.write_error_body(status, "text/plain; charset=utf-8", text.into_bytes());
    }
}

/// A route group sharing a path prefix and a middleware list.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trellis::{Router, StatusCode};
/// use trellis::middleware::RequestId;
///
/// let mut router = Router::new();
/// let mut api = router.group("/api");
/// api.use_middleware(Arc::new(RequestId::new()));
/// api.get("/health", |ctx: trellis::Context| async move {
///     ctx.string(StatusCode::Ok, "healthy")
/// });
/// ```
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Group<'_> {
    /// Appends a middleware applied to every route registered through this
    /// group (and its nested groups) after global middleware.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Opens a nested group. The child inherits this group's prefix and
    /// middleware; its own middleware runs after the parent's.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: format!("{}{}", self.prefix, prefix.trim_end_matches('/')),
            middleware: self.middleware.clone(),
            router: &mut *self.router,
        }
    }

    fn join(&self, path: &str) -> String {
        if path == "/" {
            if self.prefix.is_empty() {
                "/".to_owned()
            } else {
                self.prefix.clone()
            }
        } else {
            format!("{}{}", self.prefix, path)
        }
    }

    /// Registers a route carrying the group's middleware plus `extra`
    /// route-specific middleware.
    pub fn add_with(
        &mut self,
        method: Method,
        path: &str,
        handler: impl IntoHandler,
        extra: Vec<Arc<dyn Middleware>>,
    ) {
        let mut middleware = self.middleware.clone();
        middleware.extend(extra);
        self.router
            .add_with(method, &self.join(path), handler, middleware);
    }

    pub fn add(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        self.add_with(method, path, handler, Vec::new());
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Get, path, handler);
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Post, path, handler);
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Put, path, handler);
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Delete, path, handler);
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) {
        self.add(Method::Patch, path, handler);
    }
}
