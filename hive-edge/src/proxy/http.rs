//! Streaming HTTP forwarding
//!
//! Requests and responses are streamed end to end; neither body is buffered
//! in the gateway. Hop-by-hop headers are stripped in both directions, the
//! request carries the declared allow-list plus injected identity headers,
//! and upstream failures map onto the 502/503/504 taxonomy.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::Response;
use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::breaker::CircuitBreaker;
use crate::auth::Principal;
use crate::config::ProxyConfig;
use crate::context::{RequestContext, CORRELATION_HEADER, REQUEST_ID_HEADER};
use crate::error::{Error, Result};
use crate::routing::Route;

/// Headers that never cross the proxy, in either direction
static HOP_BY_HOP: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ])
});

const FORWARDED_METHODS: &[Method] = &[
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::HEAD,
    Method::OPTIONS,
];

/// Upstream HTTP client
#[derive(Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    config: ProxyConfig,
}

impl ProxyClient {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build upstream client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Forward a request to the route's target, streaming both bodies
    pub async fn forward(
        &self,
        route: &Route,
        request: axum::extract::Request,
        principal: Option<&Principal>,
        ctx: &RequestContext,
        breaker: Option<&CircuitBreaker>,
    ) -> Result<Response> {
        let (parts, body) = request.into_parts();

        if !FORWARDED_METHODS.contains(&parts.method) {
            return Err(Error::Validation(format!(
                "Method {} is not forwarded",
                parts.method
            )));
        }

        let rewritten = route.rewrite(parts.uri.path());
        let url = match parts.uri.query() {
            Some(query) => format!("{}{}?{}", route.target, rewritten, query),
            None => format!("{}{}", route.target, rewritten),
        };

        let headers = self.upstream_headers(&parts.headers, route, principal, ctx);

        tracing::debug!(
            route = %route.id,
            target = %url,
            method = %parts.method,
            "Forwarding request upstream"
        );

        let outcome = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match outcome {
            Ok(response) => response,
            Err(e) => {
                if let Some(breaker) = breaker {
                    breaker.record_failure();
                }
                return Err(classify_send_error(&route.id, e));
            }
        };

        let status = upstream.status();

        // Upstream 5xx is a gateway-level failure, not a passthrough
        if status.is_server_error() {
            if let Some(breaker) = breaker {
                breaker.record_failure();
            }
            return Err(Error::Upstream(format!(
                "Upstream for route '{}' returned {}",
                route.id, status
            )));
        }

        if let Some(breaker) = breaker {
            breaker.record_success();
        }

        let mut builder = Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                if !HOP_BY_HOP.contains(name.as_str()) {
                    headers.insert(name.clone(), value.clone());
                }
            }
        }

        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| Error::Internal(format!("Failed to assemble upstream response: {}", e)))
    }

    /// Build the upstream header set: allow-list + propagation + identity
    fn upstream_headers(
        &self,
        incoming: &HeaderMap,
        route: &Route,
        principal: Option<&Principal>,
        ctx: &RequestContext,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in incoming {
            let name_str = name.as_str();
            if HOP_BY_HOP.contains(name_str) {
                continue;
            }
            if self
                .config
                .allowed_headers
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(name_str))
            {
                headers.insert(name.clone(), value.clone());
            }
        }

        // Correlation propagates even when the client did not send it
        if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
            headers.insert(HeaderName::from_static(CORRELATION_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
            headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        if let Some(principal) = principal {
            principal.inject_headers(&mut headers);
        }

        for (name, value) in route.injected_headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        headers
    }
}

fn classify_send_error(route_id: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::UpstreamTimeout(format!("Route '{}' deadline exceeded", route_id))
    } else if error.is_connect() {
        Error::Unavailable(format!("Route '{}' target unreachable", route_id))
    } else {
        Error::Upstream(format!("Route '{}' upstream error: {}", route_id, error))
    }
}

/// 503 body for routes whose target is explicitly marked degraded
pub fn degraded_response(route_id: &str) -> Error {
    Error::Unavailable(format!("Route '{}' is temporarily degraded", route_id))
}
