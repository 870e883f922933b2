//! Structured HTTP errors.
//!
//! Handlers and middleware fail with [`HttpError`]: a status code, a public
//! message, and an optional wrapped cause. The dispatcher routes every
//! unrecovered error through the router's global error handler exactly once;
//! the cause is only ever rendered to clients in debug mode.

use std::error::Error as StdError;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::http::StatusCode;

/// The public-facing message of an [`HttpError`].
///
/// Text renders as-is; JSON values render as the `error` field of the JSON
/// error body.
#[derive(Debug, Clone)]
pub enum ErrorMessage {
    Text(String),
    Json(Value),
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Json(v) => f.write_str(&v.to_string()),
        }
    }
}

/// A structured error carrying an HTTP status, a public message, and an
/// optional wrapped cause.
///
/// # Examples
///
/// ```
/// use trellis::{HttpError, StatusCode};
///
/// let err = HttpError::new(StatusCode::NotFound);
/// assert_eq!(err.status(), StatusCode::NotFound);
/// assert_eq!(err.message().to_string(), "Not Found");
///
/// let err = HttpError::new(StatusCode::BadRequest).with_message("bad id");
/// assert_eq!(err.message().to_string(), "bad id");
/// ```
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: Option<ErrorMessage>,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl HttpError {
    /// Creates an error with the given status. The message defaults to the
    /// status's canonical reason phrase.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            cause: None,
        }
    }

    /// Replaces the public message with a plain-text string.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(ErrorMessage::Text(message.into()));
        self
    }

    /// Replaces the public message with a structured JSON value.
    #[must_use]
    pub fn with_json(mut self, message: Value) -> Self {
        self.message = Some(ErrorMessage::Json(message));
        self
    }

    /// Attaches a wrapped cause, preserved for introspection and debug-mode
    /// rendering.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Wraps an arbitrary error as an internal server error.
    pub fn internal(cause: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::new(StatusCode::InternalServerError).with_cause(cause)
    }

    /// The deadline-exceeded sentinel returned by timeout middleware.
    pub fn timeout() -> Self {
        Self::new(StatusCode::ServiceUnavailable).with_cause(DeadlineExceeded)
    }

    /// Returns the HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the public message, falling back to the canonical reason phrase.
    pub fn message(&self) -> ErrorMessage {
        self.message
            .clone()
            .unwrap_or_else(|| ErrorMessage::Text(self.status.canonical_reason().to_owned()))
    }

    /// Returns the wrapped cause, if any.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
        self.cause.as_deref()
    }

    /// Returns `true` when this error carries the [`DeadlineExceeded`] sentinel.
    pub fn is_timeout(&self) -> bool {
        self.cause
            .as_deref()
            .is_some_and(|cause| cause.is::<DeadlineExceeded>())
    }

    /// Renders the cause chain as a single string for logs and debug bodies.
    pub fn cause_chain(&self) -> Option<String> {
        let mut current: Option<&(dyn StdError + 'static)> = match &self.cause {
            Some(cause) => Some(cause.as_ref() as &(dyn StdError + 'static)),
            None => return None,
        };
        let mut rendered = String::new();
        while let Some(err) = current {
            if !rendered.is_empty() {
                rendered.push_str(": ");
            }
            rendered.push_str(&err.to_string());
            current = err.source();
        }
        Some(rendered)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message())
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StatusCode::BadRequest)
            .with_message("malformed JSON payload")
            .with_cause(err)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

/// Sentinel cause attached by timeout middleware when a deadline fires.
#[derive(Debug, Error)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// A binding/validation failure with per-field details.
///
/// Surfaces as a `400 Bad Request` whose JSON message carries one entry per
/// offending field.
#[derive(Debug, Error)]
#[error("validation failed for {} field(s)", fields.len())]
pub struct ValidationError {
    fields: Vec<(String, String)>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Records a failure for `field`.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>, reason: impl Into<String>) -> Self {
        self.fields.push((field.into(), reason.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ValidationError> for HttpError {
    fn from(err: ValidationError) -> Self {
        let details: Value = err
            .fields
            .iter()
            .map(|(field, reason)| (field.clone(), Value::String(reason.clone())))
            .collect::<serde_json::Map<_, _>>()
            .into();
        HttpError::new(StatusCode::BadRequest)
            .with_json(details)
            .with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_message_is_canonical_reason() {
        let err = HttpError::new(StatusCode::ServiceUnavailable);
        assert_eq!(err.message().to_string(), "Service Unavailable");
    }

    #[test]
    fn wrapping_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = HttpError::internal(io);
        assert_eq!(err.status(), StatusCode::InternalServerError);
        assert_eq!(err.cause_chain().as_deref(), Some("disk on fire"));
    }

    #[test]
    fn timeout_sentinel_is_detectable() {
        assert!(HttpError::timeout().is_timeout());
        assert!(!HttpError::new(StatusCode::ServiceUnavailable).is_timeout());
    }

    #[test]
    fn validation_error_renders_fields_as_json() {
        let err: HttpError = ValidationError::new()
            .field("name", "must not be empty")
            .field("age", "must be positive")
            .into();
        assert_eq!(err.status(), StatusCode::BadRequest);
        match err.message() {
            ErrorMessage::Json(v) => {
                assert_eq!(v["name"], "must not be empty");
                assert_eq!(v["age"], "must be positive");
            }
            other => panic!("expected JSON message, got {other:?}"),
        }
    }

    #[test]
    fn json_parse_error_maps_to_400() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: HttpError = parse_err.into();
        assert_eq!(err.status(), StatusCode::BadRequest);
        assert!(err.cause().is_some());
    }
}
