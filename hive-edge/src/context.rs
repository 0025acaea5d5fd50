//! Per-request correlation and identity
//!
//! Every inbound request receives a correlation ID (taken from a recognized
//! header, otherwise freshly generated) and a request ID. Both travel in a
//! [`RequestContext`] extension, are bound to the request's tracing span,
//! and are echoed back on the response.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header the correlation ID is read from and echoed on
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Header the request ID is echoed on
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Headers to propagate to upstream services
pub const PROPAGATE_HEADERS: &[&str] = &[
    "x-request-id",
    "x-correlation-id",
    "x-trace-id",
    "x-span-id",
];

/// Sensitive headers that should be masked in logs
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
];

/// Request-scoped identity, cleared when the request completes
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation ID, shared across service hops
    pub correlation_id: String,

    /// Request ID, unique to this hop
    pub request_id: String,

    /// Canonical operation name derived from method + path
    pub operation: String,
}

impl RequestContext {
    /// Build a context from inbound headers, generating missing identifiers
    pub fn from_request(headers: &HeaderMap, method: &str, path: &str) -> Self {
        let correlation_id = headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| is_valid_correlation_id(v))
            .map(|v| v.to_string())
            .unwrap_or_else(new_opaque_id);

        Self {
            correlation_id,
            request_id: new_opaque_id(),
            operation: operation_name(method, path),
        }
    }
}

/// Generate a high-entropy opaque identifier
pub fn new_opaque_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A recognized correlation ID is short, printable, and header-safe
fn is_valid_correlation_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Canonical operation-name prefixes, checked in order
const OPERATION_PREFIXES: &[(&str, &str)] = &[
    ("/auth", "auth"),
    ("/api/v1/notifications", "notifications"),
    ("/api/v1/templates", "templates"),
    ("/health", "health"),
    ("/ready", "health"),
    ("/ws", "ws"),
    ("/hives", "hives"),
];

/// Derive an operation name from method + path
///
/// Known prefixes collapse to a canonical name; anything else falls back to
/// method + sanitized path so metric/log cardinality stays bounded.
pub fn operation_name(method: &str, path: &str) -> String {
    for (prefix, name) in OPERATION_PREFIXES {
        if path == *prefix || path.starts_with(&format!("{}/", prefix)) {
            return format!("{} {}", method, name);
        }
    }
    format!("{} {}", method, sanitize_path(path))
}

/// Replace ID-looking path segments so unknown paths stay low-cardinality
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.is_empty() {
                String::new()
            } else if looks_like_id(segment) {
                "{id}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn looks_like_id(segment: &str) -> bool {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // UUID-shaped: 36 chars with hyphens at fixed positions
    segment.len() == 36
        && segment
            .chars()
            .enumerate()
            .all(|(i, c)| match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => c.is_ascii_hexdigit(),
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_correlation_id_propagated_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("abc-123"));
        let ctx = RequestContext::from_request(&headers, "GET", "/hives/1");
        assert_eq!(ctx.correlation_id, "abc-123");
        assert_ne!(ctx.request_id, ctx.correlation_id);
    }

    #[test]
    fn test_correlation_id_generated_when_missing() {
        let headers = HeaderMap::new();
        let ctx = RequestContext::from_request(&headers, "GET", "/hives/1");
        assert_eq!(ctx.correlation_id.len(), 32);
        assert!(ctx.correlation_id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_garbage_correlation_header_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_static("bad value with spaces"),
        );
        let ctx = RequestContext::from_request(&headers, "GET", "/");
        assert_ne!(ctx.correlation_id, "bad value with spaces");
    }

    #[test]
    fn test_operation_names_for_known_prefixes() {
        assert_eq!(operation_name("GET", "/auth/logout"), "GET auth");
        assert_eq!(
            operation_name("POST", "/api/v1/notifications"),
            "POST notifications"
        );
        assert_eq!(
            operation_name("GET", "/api/v1/templates/WELCOME/en/process"),
            "GET templates"
        );
        assert_eq!(operation_name("GET", "/health/gateway"), "GET health");
    }

    #[test]
    fn test_operation_name_fallback_sanitizes_ids() {
        assert_eq!(
            operation_name("GET", "/buddies/12345/requests"),
            "GET /buddies/{id}/requests"
        );
        assert_eq!(
            operation_name(
                "DELETE",
                "/tracks/550e8400-e29b-41d4-a716-446655440000"
            ),
            "DELETE /tracks/{id}"
        );
    }

    #[test]
    fn test_opaque_ids_are_unique() {
        let a = new_opaque_id();
        let b = new_opaque_id();
        assert_ne!(a, b);
    }
}
