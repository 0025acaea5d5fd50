//! Correlation middleware: identity in, identity out
//!
//! Attaches the [`RequestContext`] extension, binds a tracing span so
//! every log line in the request carries the correlation and request IDs,
//! echoes both on the response, and — as the single top-level error
//! mapper — fills `path` and `timestamp` into gateway-origin error bodies.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;

use crate::context::{RequestContext, CORRELATION_HEADER, REQUEST_ID_HEADER};
use crate::error::UniformErrorMarker;

/// Errors bodies are tiny; anything larger is not ours to rewrite
const ERROR_BODY_CAP: usize = 64 * 1024;

pub async fn correlation(mut request: Request, next: Next) -> Response {
    let ctx = RequestContext::from_request(
        request.headers(),
        request.method().as_str(),
        request.uri().path(),
    );
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(ctx.clone());

    let span = tracing::info_span!(
        "request",
        correlation_id = %ctx.correlation_id,
        request_id = %ctx.request_id,
        operation = %ctx.operation,
    );

    let response = next.run(request).instrument(span).await;
    let mut response = enrich_error_body(response, &path).await;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    response
}

/// Fill `path`/`timestamp` into a marked uniform error body
async fn enrich_error_body(response: Response, path: &str) -> Response {
    if response.extensions().get::<UniformErrorMarker>().is_none() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, ERROR_BODY_CAP).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read error body for enrichment: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut map)) if map.contains_key("error") && map.contains_key("status") => {
            map.entry("path").or_insert_with(|| Value::from(path));
            map.entry("timestamp")
                .or_insert_with(|| Value::from(Utc::now().to_rfc3339()));

            match serde_json::to_vec(&map) {
                Ok(enriched) => {
                    parts.headers.remove(header::CONTENT_LENGTH);
                    Response::from_parts(parts, Body::from(enriched))
                }
                Err(_) => Response::from_parts(parts, Body::from(bytes)),
            }
        }
        _ => Response::from_parts(parts, Body::from(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_error_body_gains_path_and_keeps_timestamp() {
        let response = Error::Unauthorized("Valid JWT token required".to_string()).into_response();
        let enriched = enrich_error_body(response, "/hives/123").await;
        assert_eq!(enriched.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(enriched.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["message"], "Valid JWT token required");
        assert_eq!(body["status"], 401);
        assert_eq!(body["path"], "/hives/123");
        assert!(body.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn test_unmarked_responses_pass_through() {
        // A body proxied from an upstream must not be rewritten even if it
        // happens to look like an error
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from(r#"{"error": "upstream", "status": 404}"#))
            .unwrap();
        let result = enrich_error_body(response, "/x").await;

        let bytes = axum::body::to_bytes(result.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("path").is_none());
    }
}
