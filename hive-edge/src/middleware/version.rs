//! Version negotiation middleware
//!
//! Resolves the API version for the request (path > Accept-Version >
//! query > default), attaches the outcome as an extension, and stamps
//! `API-Version` plus deprecation headers on the response.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::Result;
use crate::state::AppState;

pub async fn negotiate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let query_version = request
        .uri()
        .query()
        .and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("version="))
        })
        .map(|v| v.to_string());

    let negotiated = state.versions.negotiate(
        request.uri().path(),
        request.headers(),
        query_version.as_deref(),
    )?;

    request.extensions_mut().insert(negotiated);

    let mut response = next.run(request).await;
    state
        .versions
        .apply_headers(response.headers_mut(), negotiated.version);
    Ok(response)
}
