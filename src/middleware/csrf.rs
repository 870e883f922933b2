//! CSRF protection — double-submit cookie.
//!
//! Safe methods (GET, HEAD, OPTIONS, TRACE) mint a token cookie when one is
//! absent and publish the token in the context store. Unsafe methods must
//! echo the cookie's token in a header (or, optionally, a form field); the
//! two are compared with constant-time equality and any absence or mismatch
//! is rejected with `403 Forbidden`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::context::Context;
use crate::error::HttpError;
use crate::http::{Cookie, SameSite, StatusCode};
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// CSRF middleware configuration. See the [module docs](self).
///
/// Cookie attribute defaults favor production settings: `Secure` on,
/// `SameSite=Lax`, `HttpOnly` off (the client script must read the token to
/// echo it back).
///
/// # Examples
///
/// ```rust,no_run
/// use trellis::middleware::Csrf;
///
/// let csrf = Csrf::new()
///     .cookie_name("_csrf")
///     .header_name("X-CSRF-Token")
///     .token_length(32);
/// ```
pub struct Csrf {
    cookie_name: String,
    cookie_secure: bool,
    cookie_http_only: bool,
    cookie_same_site: SameSite,
    header_name: String,
    form_field_name: Option<String>,
    context_token_key: String,
    token_length: usize,
}

impl Default for Csrf {
    fn default() -> Self {
        Self::new()
    }
}

impl Csrf {
    pub fn new() -> Self {
        Self {
            cookie_name: "_csrf".to_owned(),
            cookie_secure: true,
            cookie_http_only: false,
            cookie_same_site: SameSite::Lax,
            header_name: "X-CSRF-Token".to_owned(),
            form_field_name: None,
            context_token_key: "csrf".to_owned(),
            token_length: 32,
        }
    }

    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn cookie_http_only(mut self, http_only: bool) -> Self {
        self.cookie_http_only = http_only;
        self
    }

    #[must_use]
    pub fn cookie_same_site(mut self, same_site: SameSite) -> Self {
        self.cookie_same_site = same_site;
        self
    }

    /// Header carrying the echoed token on unsafe methods.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Also accept the token from this form field when the header is absent.
    #[must_use]
    pub fn form_field_name(mut self, name: impl Into<String>) -> Self {
        self.form_field_name = Some(name.into());
        self
    }

    /// Store key under which the active token is published.
    #[must_use]
    pub fn context_token_key(mut self, key: impl Into<String>) -> Self {
        self.context_token_key = key.into();
        self
    }

    /// Number of random bytes in a generated token (encoded URL-safe base64).
    #[must_use]
    pub fn token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    fn generate_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_length];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn forbidden() -> HttpError {
        HttpError::new(StatusCode::Forbidden).with_message("CSRF token missing or invalid")
    }
}

/// Constant-time string equality; naive comparison would leak the token
/// prefix through timing.
fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl Middleware for Csrf {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let cookie_name = self.cookie_name.clone();
        let header_name = self.header_name.clone();
        let form_field_name = self.form_field_name.clone();
        let context_token_key = self.context_token_key.clone();
        let minted = if ctx.cookie(&cookie_name).is_none() && ctx.method().is_safe() {
            Some(self.generate_token())
        } else {
            None
        };
        let cookie_attrs = (self.cookie_secure, self.cookie_http_only, self.cookie_same_site);

        Box::pin(async move {
            if ctx.method().is_safe() {
                let token = match ctx.cookie(&cookie_name) {
                    Some(token) => token.to_owned(),
                    None => {
                        let token = minted.expect("token minted for safe method");
                        let (secure, http_only, same_site) = cookie_attrs;
                        let cookie = Cookie::new(cookie_name.as_str(), token.as_str())
                            .path("/")
                            .secure(secure)
                            .http_only(http_only)
                            .same_site(same_site);
                        ctx.set_cookie(&cookie);
                        token
                    }
                };
                ctx.set(context_token_key, token);
                return next.run(ctx).await;
            }

            // Unsafe method: both sides must be present and equal.
            let Some(cookie_token) = ctx.cookie(&cookie_name).map(str::to_owned) else {
                return Err(Csrf::forbidden());
            };

            let presented = match ctx.header(&header_name) {
                Some(token) if !token.is_empty() => Some(token.to_owned()),
                _ => form_field_name
                    .as_deref()
                    .and_then(|field| ctx.form_value(field)),
            };
            let Some(presented) = presented else {
                return Err(Csrf::forbidden());
            };

            if !tokens_match(&cookie_token, &presented) {
                tracing::warn!("CSRF token mismatch");
                return Err(Csrf::forbidden());
            }

            ctx.set(context_token_key, cookie_token);
            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::pool;
    use crate::middleware::test_support::{ok_handler, run_chain};
    use std::sync::Arc;

    fn chain() -> Vec<Arc<dyn Middleware>> {
        vec![Arc::new(Csrf::new())]
    }

    #[tokio::test]
    async fn safe_method_mints_cookie_and_publishes_token() {
        let (ctx, outcome) = run_chain(
            b"GET /form HTTP/1.1\r\nHost: x\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        let token = ctx.store().get_string("csrf").unwrap();
        assert!(!token.is_empty());
        let response = ctx.take_response();
        let set_cookie = response.headers().get("set-cookie").unwrap();
        assert!(set_cookie.starts_with(&format!("_csrf={token}")));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=Lax"));
        pool::release(ctx);
    }

    #[tokio::test]
    async fn safe_method_reuses_existing_cookie() {
        let (ctx, outcome) = run_chain(
            b"GET /form HTTP/1.1\r\nHost: x\r\nCookie: _csrf=existing\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        assert_eq!(ctx.store().get_string("csrf").as_deref(), Some("existing"));
        let response = ctx.take_response();
        assert!(!response.headers().contains("set-cookie"));
        pool::release(ctx);
    }

    #[tokio::test]
    async fn unsafe_method_without_header_is_forbidden() {
        let (ctx, outcome) = run_chain(
            b"POST /form HTTP/1.1\r\nHost: x\r\nCookie: _csrf=tok\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Forbidden);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn unsafe_method_without_cookie_is_forbidden() {
        let (ctx, outcome) = run_chain(
            b"POST /form HTTP/1.1\r\nHost: x\r\nX-CSRF-Token: tok\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Forbidden);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn mismatched_tokens_are_forbidden() {
        let (ctx, outcome) = run_chain(
            b"POST /form HTTP/1.1\r\nHost: x\r\nCookie: _csrf=aaa\r\nX-CSRF-Token: bbb\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Forbidden);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn matching_tokens_run_the_handler() {
        let (ctx, outcome) = run_chain(
            b"POST /form HTTP/1.1\r\nHost: x\r\nCookie: _csrf=T\r\nX-CSRF-Token: T\r\n\r\n",
            chain(),
            ok_handler(),
        )
        .await;
        assert!(outcome.is_ok());
        assert_eq!(ctx.response_status(), StatusCode::Ok);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn form_field_fallback_is_accepted() {
        let csrf = Csrf::new().form_field_name("_csrf");
        let raw = b"POST /form HTTP/1.1\r\nHost: x\r\nCookie: _csrf=T\r\nContent-Length: 7\r\n\r\n_csrf=T";
        let (ctx, outcome) = run_chain(raw, vec![Arc::new(csrf)], ok_handler()).await;
        assert!(outcome.is_ok());
        pool::release(ctx);
    }

    #[test]
    fn generated_tokens_have_fixed_length_and_entropy() {
        let csrf = Csrf::new().token_length(32);
        let a = csrf.generate_token();
        let b = csrf.generate_token();
        assert_ne!(a, b);
        // 32 bytes → 43 chars of unpadded URL-safe base64.
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn comparison_is_constant_time_wrapper() {
        assert!(tokens_match("same", "same"));
        assert!(!tokens_match("same", "diff"));
        assert!(!tokens_match("short", "longer-token"));
    }
}
