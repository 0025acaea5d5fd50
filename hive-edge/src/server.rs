//! HTTP server: router assembly, layer stack, graceful shutdown

use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    auth, broadcast, context, error::Result, health, middleware, notify, proxy, state::AppState,
    templates,
};

/// Build the full edge-plane router
///
/// Local endpoints are declared explicitly; everything else falls through
/// to the gateway handler and the route table. Middleware executes
/// correlation → trust → version negotiation → rate limit.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Session service
        .route("/auth/logout", post(auth::handlers::logout))
        .route("/auth/logout/all", post(auth::handlers::logout_all))
        .route("/auth/token/validate", post(auth::handlers::validate))
        .route(
            "/auth/token/validate/public",
            post(auth::handlers::validate_public),
        )
        // Notification core
        .route(
            "/api/v1/notifications",
            post(notify::handlers::create).get(notify::handlers::list),
        )
        .route("/api/v1/notifications/unread", get(notify::handlers::unread))
        .route(
            "/api/v1/notifications/unread/count",
            get(notify::handlers::unread_count),
        )
        .route(
            "/api/v1/notifications/{id}/read",
            patch(notify::handlers::mark_read),
        )
        .route(
            "/api/v1/notifications/{id}/archive",
            patch(notify::handlers::archive),
        )
        .route(
            "/api/v1/notifications/{id}",
            delete(notify::handlers::delete),
        )
        // Template store
        .route(
            "/api/v1/templates",
            post(templates::handlers::create).get(templates::handlers::find),
        )
        .route(
            "/api/v1/templates/statistics",
            get(templates::handlers::statistics),
        )
        .route("/api/v1/templates/bulk", post(templates::handlers::bulk_create))
        .route(
            "/api/v1/templates/languages/{type}",
            get(templates::handlers::languages),
        )
        .route(
            "/api/v1/templates/{id}",
            put(templates::handlers::update).delete(templates::handlers::delete),
        )
        .route(
            "/api/v1/templates/{type}/{lang}/process",
            post(templates::handlers::process),
        )
        .route(
            "/api/v1/templates/{type}/{lang}/variables",
            get(templates::handlers::variables),
        )
        .route(
            "/api/v1/templates/{type}/{lang}/validate",
            post(templates::handlers::validate_variables),
        )
        // Real-time broadcast
        .route("/ws", get(broadcast::handler::ws_handler))
        // Probes
        .route("/health", get(health::health))
        .route("/health/gateway", get(health::gateway))
        .route("/ready", get(health::readiness))
        // Everything else is gateway traffic
        .fallback(proxy::handler::gateway)
        // Innermost to outermost: rate limit, version, trust, body guard,
        // correlation
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::negotiate_version,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .layer(from_fn_with_state(state.clone(), middleware::json_guard))
        .layer(from_fn(middleware::correlation))
        .with_state(state)
}

/// Server instance
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Run the server until a shutdown signal arrives
    pub async fn serve(self) -> Result<()> {
        let config = self.state.config.clone();
        let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));

        tracing::info!("Starting {} on {}", config.service.name, addr);
        tracing::info!(
            routes = config.gateway.routes.len(),
            versions = ?config.versioning.available,
            "Gateway configuration loaded"
        );

        let body_limit = config.middleware.body_limit_mb * 1024 * 1024;
        let sensitive = context::SENSITIVE_HEADERS
            .iter()
            .map(|h| h.parse().expect("valid header name"))
            .collect::<Vec<_>>();

        let cors_layer = self.build_cors_layer(&config.middleware.cors_mode);
        let app = build_router(self.state)
            .layer(cors_layer)
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(config.service.timeout_secs),
            ))
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new())
                    .on_response(DefaultOnResponse::new()),
            )
            .layer(SetSensitiveRequestHeadersLayer::new(sensitive))
            .layer(CatchPanicLayer::new());

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    fn build_cors_layer(&self, mode: &str) -> CorsLayer {
        match mode {
            "permissive" => CorsLayer::permissive(),
            "restrictive" | "disabled" => CorsLayer::new(),
            other => {
                tracing::warn!("Unknown CORS mode: {}, defaulting to permissive", other);
                CorsLayer::permissive()
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("Shutdown signal received, draining requests...");
}
