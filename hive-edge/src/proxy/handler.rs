//! Gateway fallback handler
//!
//! Requests that no local endpoint claims land here: resolve a route,
//! apply its filter chain in declared order, and forward — over HTTP or a
//! WebSocket relay when the client asked to upgrade.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;

use crate::auth::Principal;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::routing::Negotiated;
use crate::state::AppState;

use super::http::degraded_response;

/// Parse the query string into predicate-comparable pairs
pub fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// The catch-all gateway endpoint
pub async fn gateway(State(state): State<AppState>, request: Request) -> Result<Response> {
    let ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(|| RequestContext::from_request(request.headers(), "GET", "/"));
    let negotiated = request
        .extensions()
        .get::<Negotiated>()
        .copied()
        .ok_or_else(|| Error::Internal("Version negotiation missing".to_string()))?;
    let principal = request.extensions().get::<Principal>().cloned();

    let path = request.uri().path().to_string();
    let query = request.uri().query().map(|q| q.to_string());
    let pairs = query_pairs(query.as_deref());

    let route = state
        .routes
        .resolve(&path, request.headers(), &pairs, negotiated.version)
        .ok_or_else(|| Error::NotFound(format!("No route matches {}", path)))?;

    tracing::debug!(
        route = %route.id,
        version = %negotiated.version,
        operation = %ctx.operation,
        "Route resolved"
    );

    if route.requires_auth() && principal.is_none() {
        return Err(Error::Unauthorized("Valid JWT token required".to_string()));
    }

    if route.degraded {
        return Err(degraded_response(&route.id));
    }

    let breaker = route.breaker_name().map(|name| state.breakers.get(&name));
    if let Some(breaker) = &breaker {
        if !breaker.allow() {
            return Err(Error::Unavailable(format!(
                "Route '{}' circuit is open",
                route.id
            )));
        }
    }

    if wants_websocket(request.headers()) {
        let (mut parts, _body) = request.into_parts();
        let ws = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .map_err(|e| Error::Validation(format!("Invalid WebSocket upgrade: {}", e)))?;

        let rewritten = route.rewrite(&path);
        return super::ws::proxy_upgrade(
            ws,
            &route,
            &rewritten,
            query.as_deref(),
            principal.as_ref(),
            &ctx,
            state.config.proxy.ws_buffer_frames,
        )
        .await;
    }

    state
        .proxy
        .forward(&route, request, principal.as_ref(), &ctx, breaker.as_deref())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_query_pairs_parsing() {
        assert_eq!(
            query_pairs(Some("a=1&b=2")),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert_eq!(
            query_pairs(Some("flag")),
            vec![("flag".to_string(), String::new())]
        );
        assert!(query_pairs(None).is_empty());
        assert!(query_pairs(Some("")).is_empty());
    }

    #[test]
    fn test_websocket_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_websocket(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(wants_websocket(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(wants_websocket(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        assert!(!wants_websocket(&headers));
    }
}
