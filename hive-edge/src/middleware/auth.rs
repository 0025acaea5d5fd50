//! Trust-layer middleware
//!
//! Public paths bypass verification entirely; every other request must
//! present a verifiable bearer token. Successful verification attaches the
//! [`Principal`] and the [`VerifiedToken`] as request extensions; the
//! stable 401 body hides the concrete failure reason, which is only
//! logged.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::Principal;
use crate::error::Result;
use crate::state::AppState;

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    if state.public_paths.matches(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    match state.verifier.verify_headers(request.headers()).await {
        Ok(verified) => {
            let principal = Principal::from_claims(&verified.claims);
            tracing::debug!(subject = %principal.id, "Request authenticated");
            request.extensions_mut().insert(principal);
            request.extensions_mut().insert(verified);
            Ok(next.run(request).await)
        }
        Err(failure) => {
            tracing::info!(reason = failure.reason(), "Authentication rejected");
            Err(failure.into())
        }
    }
}
