//! HTTP/1.1 protocol primitives.
//!
//! Everything the framework says on the wire goes through the types here:
//! [`Method`] and [`StatusCode`] model the request line and status line,
//! [`Headers`] and [`Cookie`] model field data, and [`Request`]/[`Response`]
//! tie them together with parsing and serialization. The rest of the crate
//! treats these as the vocabulary of the engine boundary; nothing above
//! this module touches raw bytes.

use std::fmt;

pub mod cookie;
pub mod headers;
pub mod request;
pub mod response;

pub use cookie::{Cookie, SameSite};
pub use headers::Headers;
pub use request::Request;
pub use response::Response;

/// The subset of registered HTTP status codes this framework emits or
/// inspects, as a fieldless enum so comparisons and `match` stay cheap.
///
/// Codes outside this set (teapots and friends) are not representable;
/// [`StatusCode::from_u16`] reports them as `None` rather than inventing a
/// variant.
///
/// # Examples
///
/// ```
/// use trellis::http::StatusCode;
///
/// assert_eq!(StatusCode::NoContent.as_u16(), 204);
/// assert_eq!(StatusCode::from_u16(204), Some(StatusCode::NoContent));
/// assert!(StatusCode::NoContent.is_bodyless());
/// assert_eq!(StatusCode::TooManyRequests.canonical_reason(), "Too Many Requests");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    // Informational.
    Continue = 100,
    SwitchingProtocols = 101,

    // Successful.
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,
    PartialContent = 206,

    // Redirection.
    MovedPermanently = 301,
    Found = 302,
    SeeOther = 303,
    NotModified = 304,
    TemporaryRedirect = 307,
    PermanentRedirect = 308,

    // The client did something the server will not honor.
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    RequestTimeout = 408,
    Conflict = 409,
    Gone = 410,
    LengthRequired = 411,
    PayloadTooLarge = 413,
    UriTooLong = 414,
    UnsupportedMediaType = 415,
    UnprocessableEntity = 422,
    TooManyRequests = 429,

    // The server failed, or refused on its own account.
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    GatewayTimeout = 504,
    HttpVersionNotSupported = 505,
}

impl StatusCode {
    /// The numeric code, e.g. `404`.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Maps a numeric code back to a variant; `None` for codes this crate
    /// does not model.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            100 => Self::Continue,
            101 => Self::SwitchingProtocols,
            200 => Self::Ok,
            201 => Self::Created,
            202 => Self::Accepted,
            204 => Self::NoContent,
            206 => Self::PartialContent,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            303 => Self::SeeOther,
            304 => Self::NotModified,
            307 => Self::TemporaryRedirect,
            308 => Self::PermanentRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            413 => Self::PayloadTooLarge,
            414 => Self::UriTooLong,
            415 => Self::UnsupportedMediaType,
            422 => Self::UnprocessableEntity,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            _ => return None,
        })
    }

    /// The reason phrase registered for this code. Used on the status line
    /// and as the fallback public message of a structured error.
    pub fn canonical_reason(self) -> &'static str {
        match self {
            Self::Continue => "Continue",
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::Created => "Created",
            Self::Accepted => "Accepted",
            Self::NoContent => "No Content",
            Self::PartialContent => "Partial Content",
            Self::MovedPermanently => "Moved Permanently",
            Self::Found => "Found",
            Self::SeeOther => "See Other",
            Self::NotModified => "Not Modified",
            Self::TemporaryRedirect => "Temporary Redirect",
            Self::PermanentRedirect => "Permanent Redirect",
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::NotAcceptable => "Not Acceptable",
            Self::RequestTimeout => "Request Timeout",
            Self::Conflict => "Conflict",
            Self::Gone => "Gone",
            Self::LengthRequired => "Length Required",
            Self::PayloadTooLarge => "Payload Too Large",
            Self::UriTooLong => "URI Too Long",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::UnprocessableEntity => "Unprocessable Entity",
            Self::TooManyRequests => "Too Many Requests",
            Self::InternalServerError => "Internal Server Error",
            Self::NotImplemented => "Not Implemented",
            Self::BadGateway => "Bad Gateway",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::GatewayTimeout => "Gateway Timeout",
            Self::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Whether the code is in the 2xx range.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.as_u16())
    }

    /// Whether a response with this code must not carry a payload: the 1xx
    /// range, 204, and 304 (RFC 9110 §6.4.1). Serialization and the gzip
    /// gate both consult this.
    pub fn is_bodyless(self) -> bool {
        let code = self.as_u16();
        code < 200 || code == 204 || code == 304
    }
}

impl fmt::Display for StatusCode {
    /// Formats as status line text: `404 Not Found`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// An HTTP request method.
///
/// The nine methods of RFC 9110 get fieldless variants so routing tables
/// can hash and compare them without touching string data; anything else a
/// client sends lands in `Custom` with its (uppercased) spelling intact.
/// CSRF protection and similar policy code branch on [`is_safe`], which
/// never holds for `Custom` methods.
///
/// [`is_safe`]: Method::is_safe
///
/// # Examples
///
/// ```
/// use trellis::http::Method;
///
/// let method: Method = "delete".parse().unwrap();
/// assert_eq!(method, Method::Delete);
/// assert_eq!(method.as_str(), "DELETE");
/// assert!(!method.is_safe());
/// assert!(method.is_idempotent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Connect,
    Trace,
    /// Any method outside the RFC 9110 set, stored uppercased.
    Custom(String),
}

impl Method {
    /// The uppercase wire spelling.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Whether RFC 9110 §9.2.1 defines the method as safe, i.e. read-only
    /// from the client's point of view: GET, HEAD, OPTIONS, and TRACE.
    /// Unknown methods are assumed unsafe.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options | Self::Trace)
    }

    /// Whether repeating the request has the same effect as sending it once
    /// (RFC 9110 §9.2.2): every safe method plus PUT and DELETE.
    pub fn is_idempotent(&self) -> bool {
        self.is_safe() || matches!(self, Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    // Route tables are keyed by uppercased method, so parsing normalizes case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            _ => Self::Custom(s.to_ascii_uppercase()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for code in [200u16, 204, 301, 404, 405, 429, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(status.as_u16(), code);
        }
        assert!(StatusCode::from_u16(418).is_none());
    }

    #[test]
    fn status_line_rendering() {
        assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        assert_eq!(
            StatusCode::ServiceUnavailable.to_string(),
            "503 Service Unavailable"
        );
    }

    #[test]
    fn bodyless_statuses() {
        assert!(StatusCode::NoContent.is_bodyless());
        assert!(StatusCode::NotModified.is_bodyless());
        assert!(StatusCode::SwitchingProtocols.is_bodyless());
        assert!(!StatusCode::Ok.is_bodyless());
    }

    #[test]
    fn method_parse_is_case_insensitive() {
        let m: Method = "get".parse().unwrap();
        assert_eq!(m, Method::Get);
        let m: Method = "PuRgE".parse().unwrap();
        assert_eq!(m, Method::Custom("PURGE".to_owned()));
    }

    #[test]
    fn safety_and_idempotence() {
        assert!(Method::Get.is_safe());
        assert!(Method::Trace.is_safe());
        assert!(!Method::Post.is_safe());
        assert!(Method::Put.is_idempotent());
        assert!(!Method::Patch.is_idempotent());
        // Unknown methods are assumed neither safe nor idempotent.
        let custom = Method::Custom("PURGE".to_owned());
        assert!(!custom.is_safe());
        assert!(!custom.is_idempotent());
    }
}
