//! Application state and explicit construction
//!
//! The process entry point builds every component — cache, trust layer,
//! rate-limit engine, route table, proxy client, producer, notification
//! core, broadcast hub — and hands the assembled state to the server.
//! Nothing here is framework-managed; construction order is the dependency
//! order.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{RevocationStore, TokenVerifier};
use crate::broadcast::{AllowAll, BroadcastHub};
use crate::cache::{Cache, RedisCache};
use crate::config::Config;
use crate::error::Result;
use crate::notify::{CacheNotificationStore, NotificationService};
use crate::producer::{create_client, BrokerTransport, JetStreamTransport, OutboundProducer};
use crate::proxy::{BreakerRegistry, ProxyClient};
use crate::ratelimit::RateLimitEngine;
use crate::routing::{PathSet, RouteTable, VersionPolicy};
use crate::templates::TemplateStore;

/// Shared application state; cheap to clone, immutable after assembly
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Arc<dyn Cache>,
    pub verifier: TokenVerifier,
    pub revocation: RevocationStore,
    pub limiter: Arc<RateLimitEngine>,
    pub routes: Arc<RouteTable>,
    pub public_paths: PathSet,
    pub versions: VersionPolicy,
    pub breakers: Arc<BreakerRegistry>,
    pub proxy: ProxyClient,
    pub producer: Arc<OutboundProducer>,
    pub notifications: Arc<NotificationService>,
    pub templates: Arc<TemplateStore>,
    pub hub: Arc<BroadcastHub>,
}

impl AppState {
    /// Build the full state against real Redis and NATS
    pub async fn from_config(config: Config) -> Result<Self> {
        let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&config.redis).await?);
        let client = create_client(&config.nats).await?;
        let transport: Arc<dyn BrokerTransport> = Arc::new(JetStreamTransport::new(client));
        let verifier = TokenVerifier::from_config(&config.jwt)?;
        Self::assemble(config, cache, transport, verifier)
    }

    /// Wire the components together from explicit dependencies
    ///
    /// Tests pass the in-memory cache, a recording transport, and a
    /// secret-based verifier through this same path.
    pub fn assemble(
        config: Config,
        cache: Arc<dyn Cache>,
        transport: Arc<dyn BrokerTransport>,
        verifier: TokenVerifier,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let revocation = RevocationStore::new(cache.clone());
        let verifier = verifier.with_revocation(revocation.clone());

        let limiter = Arc::new(RateLimitEngine::new(
            cache.clone(),
            config.rate_limit.clone(),
        ));

        let routes = Arc::new(RouteTable::from_config(&config.gateway)?);
        let public_paths = PathSet::compile(&config.gateway.public_paths)?;
        let versions = VersionPolicy::from_config(&config.versioning)?;

        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let proxy = ProxyClient::new(&config.proxy)?;

        let producer = Arc::new(OutboundProducer::new(transport, config.producer.clone()));

        let templates = Arc::new(if config.templates.seed_defaults {
            TemplateStore::with_defaults(&config.templates.default_language)
        } else {
            TemplateStore::new(&config.templates.default_language)
        });

        let store = Arc::new(CacheNotificationStore::new(
            cache.clone(),
            Duration::from_secs(config.notification.record_ttl_secs),
        ));
        let notifications = Arc::new(NotificationService::new(
            store,
            templates.clone(),
            producer.clone(),
            cache.clone(),
            config.notification.clone(),
        ));

        let hub = Arc::new(BroadcastHub::new(Arc::new(AllowAll)).with_cache(cache.clone()));

        Ok(Self {
            config,
            cache,
            verifier,
            revocation,
            limiter,
            routes,
            public_paths,
            versions,
            breakers,
            proxy,
            producer,
            notifications,
            templates,
            hub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::JwtConfig;
    use crate::producer::testing::RecordingTransport;

    pub(crate) fn test_state() -> AppState {
        let config = Config::default();
        let jwt = JwtConfig {
            algorithm: "HS256".to_string(),
            ..config.jwt.clone()
        };
        let verifier = TokenVerifier::with_secret(b"test-secret", &jwt).unwrap();
        AppState::assemble(
            config,
            Arc::new(MemoryCache::new()),
            Arc::new(RecordingTransport::new(0)),
            verifier,
        )
        .unwrap()
    }

    #[test]
    fn test_assembly_from_defaults() {
        let state = test_state();
        assert_eq!(state.config.service.name, "hive-edge");
        assert!(state.public_paths.matches("/health"));
        assert!(state.public_paths.matches("/health/gateway"));
        assert!(!state.public_paths.matches("/api/v1/notifications"));
    }

    #[test]
    fn test_state_is_cheap_to_clone() {
        let state = test_state();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.templates, &cloned.templates));
        assert!(Arc::ptr_eq(&state.limiter, &cloned.limiter));
    }
}
