//! Basic authentication middleware.
//!
//! Parses `Authorization: Basic …`, base64-decodes the credentials, and
//! splits them on the first colon into user and password. The pair is handed
//! to a user-supplied async validator. Missing or malformed credentials and
//! rejected pairs produce `401 Unauthorized` with a `WWW-Authenticate`
//! challenge; validator errors propagate as `500`. On success the returned
//! user info is stored in the context store.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::context::Context;
use crate::error::HttpError;
use crate::http::StatusCode;
use crate::middleware::{Middleware, MiddlewareFuture, Next};

/// Opaque user info returned by a validator and published to the store.
pub type UserInfo = Arc<dyn Any + Send + Sync>;

type ValidatorFuture = Pin<Box<dyn Future<Output = Result<Option<UserInfo>, HttpError>> + Send>>;
type Validator = Arc<dyn Fn(String, String) -> ValidatorFuture + Send + Sync>;
type AuthErrorHandler = Arc<dyn Fn(&Context) + Send + Sync>;

/// Basic-auth middleware. See the [module docs](self).
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trellis::middleware::BasicAuth;
///
/// let auth = BasicAuth::new(|user, password| async move {
///     if user == "admin" && password == "hunter2" {
///         Ok(Some(Arc::new(user) as trellis::middleware::basic_auth::UserInfo))
///     } else {
///         Ok(None)
///     }
/// })
/// .realm("admin area");
/// ```
pub struct BasicAuth {
    validator: Validator,
    realm: String,
    context_user_key: String,
    error_handler: Option<AuthErrorHandler>,
}

impl BasicAuth {
    /// Creates the middleware around an async validator returning
    /// `Ok(Some(user_info))` for valid credentials, `Ok(None)` for invalid
    /// ones, and `Err` for validation infrastructure failures.
    pub fn new<F, Fut>(validator: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<UserInfo>, HttpError>> + Send + 'static,
    {
        Self {
            validator: Arc::new(move |user, password| {
                Box::pin(validator(user, password)) as ValidatorFuture
            }),
            realm: "Restricted".to_owned(),
            context_user_key: "auth_user".to_owned(),
            error_handler: None,
        }
    }

    /// Sets the realm advertised in the `WWW-Authenticate` challenge.
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Store key under which validated user info is published.
    #[must_use]
    pub fn context_user_key(mut self, key: impl Into<String>) -> Self {
        self.context_user_key = key.into();
        self
    }

    /// Replaces the default 401 response writer.
    #[must_use]
    pub fn error_handler(mut self, handler: impl Fn(&Context) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }
}

/// Extracts `(user, password)` from an `Authorization` header value.
fn decode_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

impl Middleware for BasicAuth {
    fn handle(&self, ctx: Context, next: Next) -> MiddlewareFuture {
        let validator = self.validator.clone();
        let realm = self.realm.clone();
        let context_user_key = self.context_user_key.clone();
        let error_handler = self.error_handler.clone();

        Box::pin(async move {
            let unauthorized = |ctx: &Context| {
                ctx.set_header("WWW-Authenticate", format!("Basic realm=\"{realm}\""));
                if let Some(handler) = &error_handler {
                    handler(ctx);
                }
                HttpError::new(StatusCode::Unauthorized)
            };

            let credentials = ctx
                .header("authorization")
                .and_then(decode_credentials);
            let Some((user, password)) = credentials else {
                return Err(unauthorized(&ctx));
            };

            match validator(user, password).await {
                // Validator infrastructure failure is a server error.
                Err(err) => Err(HttpError::internal(err)),
                Ok(None) => Err(unauthorized(&ctx)),
                Ok(Some(user_info)) => {
                    ctx.set(context_user_key, user_info);
                    next.run(ctx).await
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::pool;
    use crate::middleware::test_support::{ok_handler, run_chain};

    fn auth() -> BasicAuth {
        BasicAuth::new(|user, password| async move {
            match (user.as_str(), password.as_str()) {
                ("admin", "secret") => Ok(Some(Arc::new("admin".to_owned()) as UserInfo)),
                ("broken", _) => Err(HttpError::new(StatusCode::BadGateway)
                    .with_message("directory unreachable")),
                _ => Ok(None),
            }
        })
        .realm("test realm")
    }

    fn request_with_auth(value: &str) -> Vec<u8> {
        format!("GET / HTTP/1.1\r\nHost: x\r\nAuthorization: {value}\r\n\r\n").into_bytes()
    }

    fn encode(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
    }

    #[tokio::test]
    async fn missing_header_yields_401_with_challenge() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth())];
        let (ctx, outcome) =
            run_chain(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", chain, ok_handler()).await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Unauthorized);
        let response = ctx.take_response();
        assert_eq!(
            response.headers().get("www-authenticate"),
            Some("Basic realm=\"test realm\"")
        );
        pool::release(ctx);
    }

    #[tokio::test]
    async fn malformed_base64_yields_401() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth())];
        let raw = request_with_auth("Basic %%%not-base64%%%");
        let (ctx, outcome) = run_chain(&raw, chain, ok_handler()).await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Unauthorized);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn wrong_password_yields_401() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth())];
        let raw = request_with_auth(&encode("admin", "wrong"));
        let (ctx, outcome) = run_chain(&raw, chain, ok_handler()).await;
        assert_eq!(outcome.unwrap_err().status(), StatusCode::Unauthorized);
        pool::release(ctx);
    }

    #[tokio::test]
    async fn valid_credentials_store_user_info_and_proceed() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth())];
        let raw = request_with_auth(&encode("admin", "secret"));
        let (ctx, outcome) = run_chain(&raw, chain, ok_handler()).await;
        assert!(outcome.is_ok());
        let user_info = ctx.store().must_get::<UserInfo>("auth_user");
        assert_eq!(
            user_info.downcast_ref::<String>().map(String::as_str),
            Some("admin")
        );
        pool::release(ctx);
    }

    #[tokio::test]
    async fn validator_error_propagates_as_500() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth())];
        let raw = request_with_auth(&encode("broken", "whatever"));
        let (ctx, outcome) = run_chain(&raw, chain, ok_handler()).await;
        assert_eq!(
            outcome.unwrap_err().status(),
            StatusCode::InternalServerError
        );
        pool::release(ctx);
    }

    #[tokio::test]
    async fn password_may_contain_colons() {
        let auth = BasicAuth::new(|user, password| async move {
            if user == "u" && password == "a:b:c" {
                Ok(Some(Arc::new(()) as UserInfo))
            } else {
                Ok(None)
            }
        });
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(auth)];
        let raw = request_with_auth(&encode("u", "a:b:c"));
        let (ctx, outcome) = run_chain(&raw, chain, ok_handler()).await;
        assert!(outcome.is_ok());
        pool::release(ctx);
    }

    #[test]
    fn decode_rejects_non_basic_schemes() {
        assert!(decode_credentials("Bearer token").is_none());
        assert!(decode_credentials("Basic").is_none());
    }
}
