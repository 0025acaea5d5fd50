//! Error types and HTTP response conversion
//!
//! Every failure in the edge plane flows through [`Error`] and is rendered
//! as the uniform JSON body `{error, message, status, timestamp, path}`.
//! Filters and handlers produce typed errors; the correlation middleware is
//! the single top-level mapper that fills in `path`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the edge-plane error
pub type Result<T> = std::result::Result<T, Error>;

/// Rate-limit decision details carried on 429 responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Capacity of the controlling quota
    pub limit: u64,
    /// Remaining requests in the current window (0 on rejection)
    pub remaining: u64,
    /// Epoch milliseconds at which the window resets
    pub reset_ms: i64,
    /// Seconds until a retry may succeed
    pub retry_after_secs: u64,
}

/// Main error type for the edge plane
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(Box<redis::RedisError>),

    /// NATS error
    #[error("NATS error: {0}")]
    Nats(String),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(Box<jsonwebtoken::errors::Error>),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(Box<axum::http::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input, schema violation, XSS-suspect content (400)
    #[error("Bad request: {0}")]
    Validation(String),

    /// Missing/malformed/expired/revoked credentials (401)
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Principal lacks a capability (403); used sparingly
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No route matched, unknown notification/template (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// No acceptable API version (406)
    #[error("Version not acceptable: {0}")]
    VersionNotAcceptable(String),

    /// Quota exhausted (429); carries the controlling quota's headers
    #[error("Rate limit exceeded")]
    RateLimited(RateLimitInfo),

    /// Upstream 5xx or invalid upstream response body (502)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Circuit open, cache unavailable in fail-closed mode, pool exhausted (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Upstream deadline exceeded (504)
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Unhandled; must never leak internals (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Uniform error response body
///
/// `path` is absent until the correlation middleware enriches the response;
/// it is serialized only once present so intermediate layers can construct
/// the body without knowing the request URI.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Canonical reason ("Unauthorized", "Not Found", ...)
    pub error: String,

    /// Human-readable message; never internal details for 5xx
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// When the error response was produced
    pub timestamp: DateTime<Utc>,

    /// Request path, filled in by the top-level mapper
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorBody {
    /// Create a new error body with the canonical reason for `status`
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: canonical_reason(status).to_string(),
            message: message.into(),
            status: status.as_u16(),
            timestamp: Utc::now(),
            path: None,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Reason phrase used in the `error` field of the uniform body
fn canonical_reason(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::UNAUTHORIZED => "Unauthorized",
        StatusCode::FORBIDDEN => "Forbidden",
        StatusCode::NOT_FOUND => "Not Found",
        StatusCode::NOT_ACCEPTABLE => "Not Acceptable",
        StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
        StatusCode::BAD_GATEWAY => "Bad Gateway",
        StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
        StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

impl Error {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Http(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) | Error::Jwt(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::VersionNotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Error::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Config(_)
            | Error::Redis(_)
            | Error::Nats(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message; 5xx variants never expose internals
    fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::Unauthorized(msg) => msg.clone(),
            Error::Forbidden(msg) => msg.clone(),
            Error::NotFound(msg) => msg.clone(),
            Error::VersionNotAcceptable(msg) => msg.clone(),
            Error::RateLimited(_) => "Too many requests".to_string(),
            Error::Upstream(_) => "Upstream service error".to_string(),
            Error::Unavailable(msg) => msg.clone(),
            Error::UpstreamTimeout(_) => "Upstream request timed out".to_string(),
            Error::Jwt(_) => "Valid JWT token required".to_string(),
            Error::Http(e) => e.to_string(),
            Error::Config(_)
            | Error::Redis(_)
            | Error::Nats(_)
            | Error::Io(_)
            | Error::Internal(_) => "Internal server error".to_string(),
        }
    }
}

/// Response extension marking a gateway-origin error body
///
/// The correlation middleware enriches only marked responses; bodies
/// proxied from upstreams pass through untouched.
#[derive(Debug, Clone, Copy)]
pub struct UniformErrorMarker;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side failures are logged with the real cause before the
        // sanitized body is produced.
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = ErrorBody::new(status, self.user_message());
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(UniformErrorMarker);

        if let Error::RateLimited(info) = &self {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", header_value(info.limit));
            headers.insert("X-RateLimit-Remaining", header_value(info.remaining));
            headers.insert(
                "X-RateLimit-Reset",
                HeaderValue::from_str(&info.reset_ms.to_string())
                    .unwrap_or(HeaderValue::from_static("0")),
            );
            headers.insert(header::RETRY_AFTER, header_value(info.retry_after_secs));
        }

        response
    }
}

fn header_value(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Jwt(Box::new(err))
    }
}

impl From<axum::http::Error> for Error {
    fn from(err: axum::http::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Unauthorized("no".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::NotFound("missing".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::VersionNotAcceptable("v9".into()).status(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            Error::Upstream("boom".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Unavailable("circuit open".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::UpstreamTimeout("deadline".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Internal("oops".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = Error::Internal("connection string postgres://user:pass@db".into());
        assert_eq!(err.user_message(), "Internal server error");

        let err = Error::Upstream("backend said 500 with stack trace".into());
        assert_eq!(err.user_message(), "Upstream service error");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::new(StatusCode::UNAUTHORIZED, "Valid JWT token required");
        assert_eq!(body.error, "Unauthorized");
        assert_eq!(body.message, "Valid JWT token required");
        assert_eq!(body.status, 401);
        assert!(body.path.is_none());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "Unauthorized");
        assert_eq!(json["status"], 401);
        // path is omitted until the top-level mapper fills it in
        assert!(json.get("path").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let err = Error::RateLimited(RateLimitInfo {
            limit: 10,
            remaining: 0,
            reset_ms: 1_700_000_000_000,
            retry_after_secs: 42,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "10");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(
            headers.get("X-RateLimit-Reset").unwrap(),
            "1700000000000"
        );
        assert_eq!(headers.get("Retry-After").unwrap(), "42");
    }

    #[test]
    fn test_canonical_reasons() {
        assert_eq!(canonical_reason(StatusCode::BAD_REQUEST), "Bad Request");
        assert_eq!(canonical_reason(StatusCode::NOT_ACCEPTABLE), "Not Acceptable");
        assert_eq!(canonical_reason(StatusCode::IM_A_TEAPOT), "Internal Server Error");
    }
}
