//! Per-request context.
//!
//! A [`Context`] wraps one request/response exchange: request accessors,
//! extracted path parameters, a typed key-value [`Store`], response write
//! helpers guarded by a single-commit once-guard, a commit-state oracle, a
//! request-scoped logger span, and a cancellable deadline token. Contexts
//! are pooled — see [`pool`] — and fully reset between requests.
//!
//! `Context` is a cheap clone (an `Arc` around the real state) so middleware
//! closures can capture it. Ownership is contractual: application code must
//! not retain a context past the request boundary. The pool enforces the
//! part that matters for safety on its own — a core with outstanding clones
//! is never reset or re-pooled, so a retained handle can only ever see its
//! own stale request, never a later one.

pub mod pool;
pub mod store;

pub use store::Store;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::HttpError;
use crate::http::request::parse_urlencoded;
use crate::http::{Cookie, Method, Request, Response, StatusCode};
use crate::router::HtmlRenderer;

/// Buffered response plus the commit-tracking flags the oracle consults.
#[derive(Debug)]
struct ResponseState {
    response: Response,
    /// A status was set explicitly (even if equal to the default 200).
    explicit_status: bool,
    /// At least one body byte was written.
    body_written: bool,
    /// The connection was handed off (upgrade/hijack).
    hijacked: bool,
    /// Once-guard: a commit helper already ran.
    committed_once: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            response: Response::default(),
            explicit_status: false,
            body_written: false,
            hijacked: false,
            committed_once: false,
        }
    }
}

pub(crate) struct ContextCore {
    request: Option<Request>,
    params: Vec<(String, String)>,
    store: Store,
    response: Mutex<ResponseState>,
    form_cache: Mutex<Option<HashMap<String, String>>>,
    cancel: RwLock<CancellationToken>,
    span: RwLock<Span>,
    renderer: RwLock<Option<Arc<dyn HtmlRenderer>>>,
}

impl ContextCore {
    fn new() -> Self {
        Self {
            request: None,
            params: Vec::new(),
            store: Store::new(),
            response: Mutex::new(ResponseState::default()),
            form_cache: Mutex::new(None),
            cancel: RwLock::new(CancellationToken::new()),
            span: RwLock::new(Span::none()),
            renderer: RwLock::new(None),
        }
    }

    /// Binds the core to a new request. Requires exclusive access, which the
    /// pool guarantees at acquisition.
    fn populate(
        &mut self,
        request: Request,
        params: Vec<(String, String)>,
        renderer: Option<Arc<dyn HtmlRenderer>>,
    ) {
        debug_assert!(self.request.is_none(), "populate called on a live context");
        let span = tracing::info_span!(
            "request",
            mode = %crate::lifecycle::mode(),
            method = %request.method(),
            path = %request.path(),
        );
        self.request = Some(request);
        self.params = params;
        *self.span.get_mut() = span;
        *self.renderer.get_mut() = renderer;
    }

    /// Returns the core to its pristine pooled state. Requires exclusive
    /// access, which the pool guarantees before re-pooling.
    fn reset(&mut self) {
        self.request = None;
        self.params.clear();
        self.store.clear();
        *self.response.get_mut() = ResponseState::default();
        *self.form_cache.get_mut() = None;
        // Cancelling the old root token tears down derived deadline tasks.
        let old = std::mem::replace(self.cancel.get_mut(), CancellationToken::new());
        old.cancel();
        *self.span.get_mut() = Span::none();
        *self.renderer.get_mut() = None;
    }
}

/// Per-request state handle. See the [module docs](self).
#[derive(Clone)]
pub struct Context {
    core: Arc<ContextCore>,
}

impl Context {
    // ── Request side ─────────────────────────────────────────────────────

    /// Returns the underlying request.
    ///
    /// # Panics
    ///
    /// Panics when called on a context that is not bound to a request.
    pub fn request(&self) -> &Request {
        self.core
            .request
            .as_ref()
            .expect("context is not bound to a request")
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        self.request().method()
    }

    /// Returns the request path.
    pub fn path(&self) -> &str {
        self.request().path()
    }

    /// Returns the first value of a request header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request().header(name)
    }

    /// Returns the value of the path parameter `name` extracted by the router.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.core
            .params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns all extracted path parameters in path order.
    pub fn params(&self) -> &[(String, String)] {
        &self.core.params
    }

    /// Returns a query parameter value.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.request().query_param(name)
    }

    /// Returns the value of the request cookie `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.request().cookie(name)
    }

    /// Returns the peer address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.request().remote_addr()
    }

    /// Returns a form field from an `application/x-www-form-urlencoded`
    /// request body. The parse is cached for the rest of the request.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let body = std::str::from_utf8(self.request().body())
            .unwrap_or("")
            .to_owned();
        let mut cache = self.core.form_cache.lock();
        cache
            .get_or_insert_with(|| parse_urlencoded(&body))
            .get(name)
            .cloned()
    }

    /// Deserializes the request body as JSON into `T`.
    ///
    /// Malformed payloads surface as `400 Bad Request`.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(self.request().body()).map_err(HttpError::from)
    }

    /// Like [`bind_json`](Self::bind_json), then runs the process-default
    /// validator (when one is registered) over the bound value.
    pub fn bind_and_validate<T>(&self) -> Result<T, HttpError>
    where
        T: DeserializeOwned + Serialize,
    {
        let value: T = self.bind_json()?;
        if let Some(validator) = crate::lifecycle::default_validator() {
            let json = serde_json::to_value(&value).map_err(HttpError::internal)?;
            validator.validate(&json).map_err(HttpError::from)?;
        }
        Ok(value)
    }

    // ── Store ────────────────────────────────────────────────────────────

    /// Returns the request-scoped key-value store.
    pub fn store(&self) -> &Store {
        &self.core.store
    }

    /// Shorthand for `store().set(...)`.
    pub fn set(&self, key: impl Into<String>, value: impl std::any::Any + Send + Sync) {
        self.store().set(key, value);
    }

    // ── Response side ────────────────────────────────────────────────────

    /// Sets the response status without writing a body. Marks the response
    /// as committed per the commit-state policy.
    pub fn set_status(&self, status: StatusCode) {
        let mut state = self.core.response.lock();
        state.explicit_status = true;
        state.response.set_status(status);
    }

    /// Appends a response header.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.core.response.lock().response.add_header(name, value);
    }

    /// Replaces a response header.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.core.response.lock().response.set_header(name, value);
    }

    /// Appends a `Set-Cookie` header.
    pub fn set_cookie(&self, cookie: &Cookie) {
        self.core.response.lock().response.add_cookie(cookie);
    }

    /// Writes a plain-text response.
    pub fn string(&self, status: StatusCode, body: impl Into<String>) -> Result<(), HttpError> {
        self.commit(
            status,
            Some("text/plain; charset=utf-8"),
            body.into().into_bytes(),
        )
    }

    /// Serializes `value` as the JSON response body.
    pub fn json<T: Serialize>(&self, status: StatusCode, value: &T) -> Result<(), HttpError> {
        let body = serde_json::to_vec(value).map_err(HttpError::internal)?;
        self.commit(status, Some("application/json; charset=utf-8"), body)
    }

    /// Writes an HTML response.
    pub fn html(&self, status: StatusCode, body: impl Into<String>) -> Result<(), HttpError> {
        self.commit(
            status,
            Some("text/html; charset=utf-8"),
            body.into().into_bytes(),
        )
    }

    /// Writes a response with an explicit content type.
    pub fn blob(
        &self,
        status: StatusCode,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<(), HttpError> {
        self.commit(status, Some(content_type), body)
    }

    /// Commits an empty `204 No Content` response.
    pub fn no_content(&self) -> Result<(), HttpError> {
        self.commit(StatusCode::NoContent, None, Vec::new())
    }

    /// Commits a redirect to `location`.
    pub fn redirect(&self, status: StatusCode, location: &str) -> Result<(), HttpError> {
        self.set_header("Location", location);
        self.commit(status, None, Vec::new())
    }

    /// Renders a named template through the router's [`HtmlRenderer`] and
    /// writes it as an HTML response.
    pub fn render(
        &self,
        status: StatusCode,
        name: &str,
        data: &serde_json::Value,
    ) -> Result<(), HttpError> {
        let renderer = self
            .core
            .renderer
            .read()
            .clone()
            .ok_or_else(|| HttpError::new(StatusCode::InternalServerError)
                .with_message("no HTML renderer is registered"))?;
        let body = renderer.render(name, data)?;
        self.html(status, body)
    }

    // Single-commit write path; the once-guard rejects a second commit.
    fn commit(
        &self,
        status: StatusCode,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<(), HttpError> {
        let mut state = self.core.response.lock();
        if state.committed_once {
            return Err(HttpError::new(StatusCode::InternalServerError)
                .with_message("response already committed"));
        }
        state.committed_once = true;
        state.explicit_status = true;
        state.response.set_status(status);
        if let Some(content_type) = content_type {
            state.response.set_header("Content-Type", content_type);
        }
        if !body.is_empty() {
            state.body_written = true;
        }
        state.response.set_body(body);
        Ok(())
    }

    /// Marks the connection as handed off (upgrade/hijack). The response is
    /// considered committed from this point on.
    pub fn mark_hijacked(&self) {
        self.core.response.lock().hijacked = true;
    }

    /// Reports whether the response has passed outside normal response
    /// control: the connection was handed off, the status is 101, body bytes
    /// were written, a status was explicitly set, or `Content-Length` was
    /// set. Error handlers consult this before writing.
    pub fn response_committed(&self) -> bool {
        let state = self.core.response.lock();
        state.hijacked
            || state.response.status() == StatusCode::SwitchingProtocols
            || state.body_written
            || state.explicit_status
            || state.response.headers().contains("content-length")
    }

    /// Current response status.
    pub fn response_status(&self) -> StatusCode {
        self.core.response.lock().response.status()
    }

    // Used by the dispatcher and error pipeline: write regardless of the
    // once-guard (the commit oracle is the only gate at that stage).
    pub(crate) fn write_error_body(
        &self,
        status: StatusCode,
        content_type: &str,
        body: Vec<u8>,
    ) {
        let mut state = self.core.response.lock();
        state.committed_once = true;
        state.explicit_status = true;
        state.body_written = !body.is_empty();
        state.response.set_status(status);
        state.response.set_header("Content-Type", content_type);
        state.response.set_body(body);
    }

    // Scoped in-place access to the buffered response, for middleware that
    // rewrites bodies (compression) after the chain returns.
    pub(crate) fn with_response<R>(&self, f: impl FnOnce(&mut Response) -> R) -> R {
        let mut state = self.core.response.lock();
        f(&mut state.response)
    }

    // Moves the buffered response out for serialization. The context must
    // not be written to afterwards.
    pub(crate) fn take_response(&self) -> Response {
        let mut state = self.core.response.lock();
        std::mem::take(&mut state.response)
    }

    // ── Cancellation ─────────────────────────────────────────────────────

    /// Returns the context's current cancellation token.
    pub fn cancellation(&self) -> CancellationToken {
        self.core.cancel.read().clone()
    }

    /// Derives a child token that fires after `timeout` (or when the parent
    /// cancels) and installs it as the context's current token. Handlers
    /// observing [`cancellation`](Self::cancellation) see the narrower
    /// deadline.
    pub fn derive_deadline(&self, timeout: Duration) -> CancellationToken {
        let child = self.core.cancel.read().child_token();
        let watch = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => watch.cancel(),
                _ = watch.cancelled() => {}
            }
        });
        *self.core.cancel.write() = child.clone();
        child
    }

    // ── Logger ───────────────────────────────────────────────────────────

    /// Returns the request-scoped logger span.
    pub fn logger(&self) -> Span {
        self.core.span.read().clone()
    }

    /// Replaces the request-scoped logger span, e.g. to enrich it with a
    /// request ID.
    pub fn set_logger(&self, span: Span) {
        *self.core.span.write() = span;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.core.request.as_ref().map(Request::path))
            .field("params", &self.core.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::pool;
    use super::*;

    fn request(raw: &[u8]) -> Request {
        Request::parse(raw).unwrap().0
    }

    fn ctx_for(raw: &[u8]) -> Context {
        pool::acquire(request(raw), Vec::new(), None)
    }

    #[test]
    fn params_lookup() {
        let ctx = pool::acquire(
            request(b"GET /users/42 HTTP/1.1\r\nHost: x\r\n\r\n"),
            vec![("id".to_owned(), "42".to_owned())],
            None,
        );
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.param("other"), None);
        pool::release(ctx);
    }

    #[test]
    fn oracle_starts_uncommitted() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert!(!ctx.response_committed());
        pool::release(ctx);
    }

    #[test]
    fn oracle_commits_on_body_write() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.string(StatusCode::Ok, "hello").unwrap();
        assert!(ctx.response_committed());
        pool::release(ctx);
    }

    #[test]
    fn oracle_commits_on_explicit_status() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.set_status(StatusCode::Ok); // explicit, even though it's the default
        assert!(ctx.response_committed());
        pool::release(ctx);
    }

    #[test]
    fn oracle_commits_on_content_length_header() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.set_header("Content-Length", "0");
        assert!(ctx.response_committed());
        pool::release(ctx);
    }

    #[test]
    fn oracle_commits_on_hijack() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.mark_hijacked();
        assert!(ctx.response_committed());
        pool::release(ctx);
    }

    #[test]
    fn oracle_stays_committed_for_request_remainder() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.string(StatusCode::Ok, "x").unwrap();
        for _ in 0..3 {
            assert!(ctx.response_committed());
        }
        pool::release(ctx);
    }

    #[test]
    fn second_commit_is_rejected() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.string(StatusCode::Ok, "first").unwrap();
        let err = ctx.string(StatusCode::Ok, "second").unwrap_err();
        assert_eq!(err.message().to_string(), "response already committed");
        pool::release(ctx);
    }

    #[test]
    fn json_sets_content_type() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.json(StatusCode::Ok, &serde_json::json!({"ok": true}))
            .unwrap();
        let response = ctx.take_response();
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(response.body_ref(), br#"{"ok":true}"#);
        pool::release(ctx);
    }

    #[test]
    fn redirect_sets_location_and_commits() {
        let ctx = ctx_for(b"GET /old HTTP/1.1\r\nHost: x\r\n\r\n");
        ctx.redirect(StatusCode::TemporaryRedirect, "/new").unwrap();
        assert!(ctx.response_committed());
        let response = ctx.take_response();
        assert_eq!(response.status(), StatusCode::TemporaryRedirect);
        assert_eq!(response.headers().get("location"), Some("/new"));
        pool::release(ctx);
    }

    #[test]
    fn form_values_are_parsed_and_cached() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 17\r\n\r\nname=bob&city=nyc";
        let ctx = ctx_for(raw);
        assert_eq!(ctx.form_value("name").as_deref(), Some("bob"));
        assert_eq!(ctx.form_value("city").as_deref(), Some("nyc"));
        assert_eq!(ctx.form_value("missing"), None);
        pool::release(ctx);
    }

    #[test]
    fn bind_json_surfaces_400_on_garbage() {
        let raw = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\n\r\n{nope";
        let ctx = ctx_for(raw);
        let err = ctx.bind_json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.status(), StatusCode::BadRequest);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn derived_deadline_fires_and_chains_to_parent() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let parent = ctx.cancellation();
        let child = ctx.derive_deadline(Duration::from_millis(10));
        assert!(!child.is_cancelled());
        child.cancelled().await;
        assert!(child.is_cancelled());
        // Deadline on the child never cancels the parent.
        assert!(!parent.is_cancelled());
        pool::release(ctx);
    }

    #[tokio::test]
    async fn parent_cancel_propagates_to_derived_token() {
        let ctx = ctx_for(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let parent = ctx.cancellation();
        let child = ctx.derive_deadline(Duration::from_secs(60));
        parent.cancel();
        child.cancelled().await;
        assert!(child.is_cancelled());
        pool::release(ctx);
    }
}
