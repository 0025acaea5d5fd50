//! Multi-dimensional rate-limit enforcement
//!
//! Decisions are made against the shared cache with atomic operations only:
//! fixed windows use INCR with TTL-on-first-increment, token buckets use
//! compare-and-set on `tokens|last_refill`. When the cache is unreachable
//! the engine follows the configured policy — an in-process governor
//! fallback (fail-open) or 503 (fail-closed).

use chrono::Utc;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::StateInformationMiddleware;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::quota::{ApiKeyTier, Decision, Dimension, QuotaSpec};
use crate::auth::Principal;
use crate::cache::Cache;
use crate::config::{DegradedMode, QuotaAlgorithm, RateLimitConfig};
use crate::error::{Error, Result};

const COUNTER_PREFIX: &str = "ratelimit:counter:";
const BUCKET_PREFIX: &str = "ratelimit:bucket:";
const VIOLATIONS_PREFIX: &str = "ratelimit:violations:";
const BLOCK_PREFIX: &str = "ratelimit:blocked:";
const BYPASS_COUNTER: &str = "ratelimit:bypass:total";

/// CAS attempts on a contended token bucket before giving up
const MAX_CAS_ATTEMPTS: u32 = 8;

type FallbackLimiter =
    RateLimiter<NotKeyed, InMemoryState, DefaultClock, StateInformationMiddleware>;

/// Everything the engine needs to know about one request
#[derive(Debug, Default)]
pub struct CheckRequest<'a> {
    /// Named quota selected by the matched route or version override
    pub route_quota: Option<&'a str>,
    /// Value of the X-API-Key header, when present
    pub api_key: Option<&'a str>,
    /// Authenticated principal, when present
    pub principal: Option<&'a Principal>,
    /// Client IP; always known
    pub ip: &'a str,
}

/// Rate-limit engine over the shared cache
pub struct RateLimitEngine {
    cache: Arc<dyn Cache>,
    config: RateLimitConfig,
    fallback: DashMap<String, Arc<FallbackLimiter>>,
}

impl RateLimitEngine {
    pub fn new(cache: Arc<dyn Cache>, config: RateLimitConfig) -> Self {
        Self {
            cache,
            config,
            fallback: DashMap::new(),
        }
    }

    /// Check a request against the controlling dimension
    pub async fn check(&self, request: &CheckRequest<'_>) -> Result<Decision> {
        // Critical-operation bypass: allow-listed roles skip enforcement
        // but are still counted.
        if let Some(principal) = request.principal {
            if principal
                .roles
                .iter()
                .any(|r| self.config.bypass_roles.iter().any(|b| b == r))
            {
                if let Err(e) = self.cache.increment(BYPASS_COUNTER, None).await {
                    tracing::debug!("Bypass counter increment failed: {}", e);
                }
                tracing::debug!(principal = %principal.id, "Rate limit bypassed by role");
                return Ok(Decision::bypass());
            }
        }

        let (dimension, spec, threshold, block_secs) = self.resolve(request);

        match self
            .enforce(&dimension, &spec, threshold, block_secs)
            .await
        {
            Ok(decision) => Ok(decision),
            Err(e) if is_cache_failure(&e) => match self.config.on_cache_error {
                DegradedMode::FailOpen => {
                    tracing::warn!(
                        dimension = %dimension,
                        "Cache unreachable; rate limiting degraded to in-process fallback: {}",
                        e
                    );
                    Ok(self.fallback_check(&dimension, &spec))
                }
                DegradedMode::FailClosed => {
                    tracing::warn!(
                        dimension = %dimension,
                        "Cache unreachable; rate limiting configured fail-closed: {}",
                        e
                    );
                    Err(Error::Unavailable(
                        "Rate limiting temporarily unavailable".to_string(),
                    ))
                }
            },
            Err(e) => Err(e),
        }
    }

    /// First matching dimension decides the applicable quota vector
    fn resolve(&self, request: &CheckRequest<'_>) -> (Dimension, QuotaSpec, u64, u64) {
        let defaults = (
            self.config.violation_threshold,
            self.config.block_secs,
        );

        if let Some(name) = request.route_quota {
            if let Some(spec) = self.config.quotas.get(name) {
                let subject = request
                    .principal
                    .map(|p| p.id.clone())
                    .or_else(|| request.api_key.map(|k| k.to_string()))
                    .unwrap_or_else(|| request.ip.to_string());
                return (
                    Dimension::Route {
                        quota: name.to_string(),
                        subject,
                    },
                    QuotaSpec::from(spec),
                    defaults.0,
                    defaults.1,
                );
            }
            tracing::warn!(quota = %name, "Route references an unknown quota; falling through");
        }

        if let Some(key) = request.api_key {
            if let Some(tier_name) = self.config.api_keys.get(key) {
                if let Some(tier) = self.config.tiers.get(tier_name) {
                    return (
                        Dimension::ApiKey {
                            key: key.to_string(),
                            tier: ApiKeyTier::from_name(tier_name).unwrap_or(ApiKeyTier::Free),
                        },
                        QuotaSpec::from(&tier.quota),
                        tier.violation_threshold,
                        tier.block_secs,
                    );
                }
            }
        }

        if let Some(principal) = request.principal {
            return (
                Dimension::Principal(principal.id.clone()),
                QuotaSpec::from(&self.config.principal),
                defaults.0,
                defaults.1,
            );
        }

        (
            Dimension::Ip(request.ip.to_string()),
            QuotaSpec::from(&self.config.ip),
            defaults.0,
            defaults.1,
        )
    }

    async fn enforce(
        &self,
        dimension: &Dimension,
        spec: &QuotaSpec,
        threshold: u64,
        block_secs: u64,
    ) -> Result<Decision> {
        let dim_key = dimension.key();

        // An active block short-circuits everything until its TTL expires
        if let Some(value) = self.cache.get(&block_key(&dim_key)).await? {
            let now = Utc::now().timestamp();
            let expiry = value.parse::<i64>().unwrap_or(now);
            let retry = (expiry - now).max(1) as u64;
            return Ok(Decision {
                allowed: false,
                limit: spec.limit(),
                remaining: 0,
                reset_ms: expiry * 1000,
                retry_after_secs: retry,
                bypassed: false,
            });
        }

        let decision = match spec.algorithm {
            QuotaAlgorithm::FixedWindow => self.fixed_window(&dim_key, spec).await?,
            QuotaAlgorithm::TokenBucket => self.token_bucket(&dim_key, spec).await?,
        };

        if decision.allowed {
            // Violations are consecutive; any allowed request resets the run
            self.cache.delete(&violations_key(&dim_key)).await?;
        } else {
            self.record_violation(dimension, &dim_key, threshold, block_secs)
                .await?;
        }

        Ok(decision)
    }

    async fn fixed_window(&self, dim_key: &str, spec: &QuotaSpec) -> Result<Decision> {
        let now = Utc::now().timestamp();
        let window_id = now / spec.window_secs as i64;
        let key = format!("{}{}:{}", COUNTER_PREFIX, dim_key, window_id);

        let count = self
            .cache
            .increment(&key, Some(Duration::from_secs(spec.window_secs)))
            .await? as u64;

        let allowed = count <= spec.capacity;
        let reset_ms = (window_id + 1) * spec.window_secs as i64 * 1000;
        let retry_after_secs = if allowed {
            0
        } else {
            ((reset_ms / 1000) - now).max(1) as u64
        };

        Ok(Decision {
            allowed,
            limit: spec.capacity,
            remaining: spec.capacity.saturating_sub(count),
            reset_ms,
            retry_after_secs,
            bypassed: false,
        })
    }

    async fn token_bucket(&self, dim_key: &str, spec: &QuotaSpec) -> Result<Decision> {
        let key = format!("{}{}", BUCKET_PREFIX, dim_key);
        let burst = spec.burst as f64;
        let rate = spec.replenish_per_sec.max(1) as f64;
        // Bucket records outlive a full drain-and-refill cycle
        let ttl = Duration::from_secs(((spec.burst / spec.replenish_per_sec.max(1)).max(1)) * 2 + spec.window_secs);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now_ms = Utc::now().timestamp_millis();
            let current = self.cache.get(&key).await?;

            let (tokens, last_ms) = match current.as_deref().and_then(parse_bucket) {
                Some(state) => state,
                None => (burst, now_ms),
            };

            let elapsed_secs = ((now_ms - last_ms).max(0) as f64) / 1000.0;
            let tokens = (tokens + elapsed_secs * rate).min(burst);

            if tokens < 1.0 {
                let deficit = 1.0 - tokens;
                let retry = (deficit / rate).ceil().max(1.0) as u64;
                let reset_ms = now_ms + (((burst - tokens) / rate) * 1000.0) as i64;
                return Ok(Decision {
                    allowed: false,
                    limit: spec.burst,
                    remaining: 0,
                    reset_ms,
                    retry_after_secs: retry,
                    bypassed: false,
                });
            }

            let after = tokens - 1.0;
            let new = format!("{:.6}|{}", after, now_ms);
            let swapped = self
                .cache
                .compare_and_set(&key, current.as_deref(), &new, Some(ttl))
                .await?;

            if swapped {
                let reset_ms = now_ms + (((burst - after) / rate) * 1000.0) as i64;
                return Ok(Decision {
                    allowed: true,
                    limit: spec.burst,
                    remaining: after.floor() as u64,
                    reset_ms,
                    retry_after_secs: 0,
                    bypassed: false,
                });
            }
            // Lost the race; re-read and try again
        }

        tracing::warn!(dimension = %dim_key, "Token bucket CAS contention exhausted");
        Ok(Decision {
            allowed: false,
            limit: spec.burst,
            remaining: 0,
            reset_ms: Utc::now().timestamp_millis() + 1000,
            retry_after_secs: 1,
            bypassed: false,
        })
    }

    async fn record_violation(
        &self,
        dimension: &Dimension,
        dim_key: &str,
        threshold: u64,
        block_secs: u64,
    ) -> Result<()> {
        let violations = self
            .cache
            .increment(
                &violations_key(dim_key),
                Some(Duration::from_secs(self.config.violation_window_secs)),
            )
            .await? as u64;

        if violations >= threshold {
            let expiry = Utc::now().timestamp() + block_secs as i64;
            self.cache
                .set(
                    &block_key(dim_key),
                    &expiry.to_string(),
                    Some(Duration::from_secs(block_secs)),
                )
                .await?;
            tracing::warn!(
                dimension = %dimension,
                kind = dimension.kind(),
                violations,
                block_secs,
                "Consecutive violations exceeded threshold; dimension blocked"
            );
        }

        Ok(())
    }

    /// Clear counters, violations, and block flags for a dimension
    pub async fn reset(&self, dimension: &Dimension) -> Result<()> {
        let dim_key = dimension.key();
        self.cache
            .delete_pattern(&format!("{}{}:*", COUNTER_PREFIX, dim_key))
            .await?;
        self.cache
            .delete(&format!("{}{}", BUCKET_PREFIX, dim_key))
            .await?;
        self.cache.delete(&violations_key(&dim_key)).await?;
        self.cache.delete(&block_key(&dim_key)).await?;
        self.fallback.remove(&dim_key);
        tracing::info!(dimension = %dim_key, "Rate limit state reset");
        Ok(())
    }

    /// In-process leaky bucket used when fail-open is configured
    fn fallback_check(&self, dimension: &Dimension, spec: &QuotaSpec) -> Decision {
        let limiter = self
            .fallback
            .entry(dimension.key())
            .or_insert_with(|| {
                let per_second =
                    NonZeroU32::new(spec.replenish_per_sec.min(u32::MAX as u64) as u32)
                        .unwrap_or(NonZeroU32::MIN);
                let burst = NonZeroU32::new(spec.burst.min(u32::MAX as u64) as u32)
                    .unwrap_or(NonZeroU32::MIN);
                let quota = Quota::per_second(per_second).allow_burst(burst);
                Arc::new(RateLimiter::direct(quota).with_middleware::<StateInformationMiddleware>())
            })
            .clone();

        let now_ms = Utc::now().timestamp_millis();
        match limiter.check() {
            Ok(snapshot) => Decision {
                allowed: true,
                limit: spec.limit(),
                remaining: snapshot.remaining_burst_capacity() as u64,
                reset_ms: now_ms + spec.window_secs as i64 * 1000,
                retry_after_secs: 0,
                bypassed: false,
            },
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                Decision {
                    allowed: false,
                    limit: spec.limit(),
                    remaining: 0,
                    reset_ms: now_ms + wait.as_millis() as i64,
                    retry_after_secs: wait.as_secs().max(1),
                    bypassed: false,
                }
            }
        }
    }
}

fn violations_key(dim_key: &str) -> String {
    format!("{}{}", VIOLATIONS_PREFIX, dim_key)
}

fn block_key(dim_key: &str) -> String {
    format!("{}{}", BLOCK_PREFIX, dim_key)
}

fn parse_bucket(value: &str) -> Option<(f64, i64)> {
    let (tokens, last) = value.split_once('|')?;
    Some((tokens.parse().ok()?, last.parse().ok()?))
}

fn is_cache_failure(error: &Error) -> bool {
    matches!(error, Error::Redis(_) | Error::Unavailable(_))
}
