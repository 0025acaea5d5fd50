//! Liveness and readiness probes

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}

/// `GET /health` — process liveness
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        service: state.config.service.name.clone(),
    })
}

/// `GET /health/gateway` — public edge liveness, bypasses authentication
pub async fn gateway(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        service: format!("{}-gateway", state.config.service.name),
    })
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub cache: &'static str,
}

/// `GET /ready` — readiness gates on the shared cache
pub async fn readiness(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    match state.cache.get("health:probe").await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "READY",
                cache: "UP",
            }),
        ),
        Err(e) => {
            tracing::warn!("Readiness probe failed against cache: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "NOT_READY",
                    cache: "DOWN",
                }),
            )
        }
    }
}
