//! Rate-limit middleware
//!
//! Builds the engine's view of the request — named route quota (with the
//! version override applied), API key, principal, client IP — and turns a
//! deny into 429. Allowed responses also carry the controlling dimension's
//! headers; bypassed requests carry none.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::Principal;
use crate::error::{Error, RateLimitInfo, Result};
use crate::proxy::handler::query_pairs;
use crate::ratelimit::{CheckRequest, Decision};
use crate::routing::Negotiated;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    // Liveness probes are never throttled
    if state.public_paths.matches(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let principal = request.extensions().get::<Principal>().cloned();
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let ip = client_ip(request.headers());
    let route_quota = route_quota(&state, &request);

    let decision = state
        .limiter
        .check(&CheckRequest {
            route_quota: route_quota.as_deref(),
            api_key: api_key.as_deref(),
            principal: principal.as_ref(),
            ip: &ip,
        })
        .await?;

    if !decision.allowed {
        return Err(Error::RateLimited(RateLimitInfo {
            limit: decision.limit,
            remaining: 0,
            reset_ms: decision.reset_ms,
            retry_after_secs: decision.retry_after_secs,
        }));
    }

    let mut response = next.run(request).await;
    if !decision.bypassed {
        apply_headers(response.headers_mut(), &decision);
    }
    Ok(response)
}

/// The named quota controlling this request, if any
///
/// A version-specific override beats the matched route's own rate-limit
/// filter.
fn route_quota(state: &AppState, request: &Request) -> Option<String> {
    let negotiated = request.extensions().get::<Negotiated>()?;

    if let Some(quota) = state
        .config
        .versioning
        .quota_overrides
        .get(negotiated.version.as_path_segment())
    {
        return Some(quota.clone());
    }

    let pairs = query_pairs(request.uri().query());
    state
        .routes
        .resolve(
            request.uri().path(),
            request.headers(),
            &pairs,
            negotiated.version,
        )
        .and_then(|route| route.rate_limit_quota().map(|q| q.to_string()))
}

/// Client IP: forwarded headers first, because the edge sits behind the LB
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("X-RateLimit-Limit", numeric(decision.limit));
    headers.insert("X-RateLimit-Remaining", numeric(decision.remaining));
    if let Ok(value) = HeaderValue::from_str(&decision.reset_ms.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

fn numeric(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
}
