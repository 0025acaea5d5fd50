//! # hive-edge
//!
//! The edge plane of the Hive platform: an API gateway and a notification
//! delivery core sharing one set of data-plane primitives.
//!
//! ## What lives here
//!
//! - **Gateway**: bearer-token trust chain with a revocation set,
//!   multi-dimensional rate limiting over shared atomic counters,
//!   predicate-based route resolution with API version negotiation, and
//!   streaming HTTP/WebSocket forwarding behind per-target circuit
//!   breakers.
//! - **Notifications**: validated intake, multilingual template rendering,
//!   recipient channel fan-out, digest aggregation, and a durable outbound
//!   queue with retry and dead-letter semantics.
//! - **Shared primitives**: the cache abstraction (counters, sets,
//!   pub/sub), correlation-ID propagation, and the topic-keyed broadcast
//!   hub.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hive_edge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::from_config(config).await?;
//!     Server::new(state).serve().await
//! }
//! ```

pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod middleware;
pub mod notify;
pub mod observability;
pub mod producer;
pub mod proxy;
pub mod ratelimit;
pub mod routing;
pub mod server;
pub mod state;
pub mod templates;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{Claims, Principal, RevocationStore, TokenVerifier, VerifyFailure};
    pub use crate::broadcast::{BroadcastHub, Frame, Topic};
    pub use crate::cache::{Cache, MemoryCache, RedisCache};
    pub use crate::config::{Config, DegradedMode};
    pub use crate::context::RequestContext;
    pub use crate::error::{Error, ErrorBody, Result};
    pub use crate::notify::{
        Notification, NotificationRequest, NotificationService, NotificationType, Priority,
    };
    pub use crate::observability::init_tracing;
    pub use crate::producer::{BrokerTransport, OutboundMessage, OutboundProducer};
    pub use crate::proxy::{BreakerRegistry, CircuitBreaker};
    pub use crate::ratelimit::{CheckRequest, Decision, RateLimitEngine};
    pub use crate::routing::{ApiVersion, RouteTable, VersionPolicy};
    pub use crate::server::{build_router, Server};
    pub use crate::state::AppState;
    pub use crate::templates::{ProcessedTemplate, TemplateStore};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};
    pub use tracing::{debug, error, info, instrument, trace, warn};
    pub use uuid::Uuid;
}
