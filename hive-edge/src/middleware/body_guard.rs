//! Pre-auth JSON body guard
//!
//! Requests to the local API surface that declare a JSON body are checked
//! for syntactic validity before authentication runs, so a bad body is a
//! 400 and never masquerades as 401. Gateway traffic is untouched: proxied
//! bodies stay streamed.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Error, Result};
use crate::state::AppState;

/// Prefixes served by local handlers rather than the proxy
const LOCAL_PREFIXES: &[&str] = &["/api/", "/auth/"];

pub async fn json_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if !applies(&request) {
        return Ok(next.run(request).await);
    }

    let limit = state.config.middleware.body_limit_mb * 1024 * 1024;
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| Error::Validation("Request body too large".to_string()))?;

    if !bytes.is_empty() && serde_json::from_slice::<serde::de::IgnoredAny>(&bytes).is_err() {
        return Err(Error::Validation("Malformed JSON body".to_string()));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

fn applies(request: &Request) -> bool {
    let method = request.method();
    if method != Method::POST && method != Method::PUT && method != Method::PATCH {
        return false;
    }

    let path = request.uri().path();
    if !LOCAL_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return false;
    }

    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().starts_with("application/json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(method: Method, path: &str, content_type: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_applies_to_local_json_writes() {
        assert!(applies(&request(
            Method::POST,
            "/api/v1/notifications",
            Some("application/json")
        )));
        assert!(applies(&request(
            Method::POST,
            "/auth/token/validate/public",
            Some("application/json; charset=utf-8")
        )));
    }

    #[test]
    fn test_skips_gateway_and_non_json() {
        // Proxied paths keep streaming bodies
        assert!(!applies(&request(
            Method::POST,
            "/hives/123/join",
            Some("application/json")
        )));
        // Reads have no body to validate
        assert!(!applies(&request(
            Method::GET,
            "/api/v1/notifications",
            Some("application/json")
        )));
        // Non-JSON content is someone else's problem
        assert!(!applies(&request(
            Method::POST,
            "/api/v1/notifications",
            Some("text/plain")
        )));
        assert!(!applies(&request(Method::POST, "/api/v1/notifications", None)));
    }
}
