//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: HIVE_EDGE_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/hive-edge/config.toml
//! 4. System directory: /etc/hive-edge/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// JWT trust chain configuration
    pub jwt: JwtConfig,

    /// Redis (shared cache) configuration
    pub redis: RedisConfig,

    /// NATS (outbound broker) configuration
    pub nats: NatsConfig,

    /// Rate limit engine configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// API versioning configuration
    #[serde(default)]
    pub versioning: VersioningConfig,

    /// Gateway route table
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Upstream forwarding configuration
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Circuit breaker defaults
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Notification core configuration
    #[serde(default)]
    pub notification: NotificationConfig,

    /// Template store configuration
    #[serde(default)]
    pub templates: TemplatesConfig,

    /// Outbound producer configuration
    #[serde(default)]
    pub producer: ProducerConfig,

    /// HTTP middleware configuration
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// JWT trust chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Path to the verification key (PEM for RS*, raw secret file for HS*)
    pub key_path: PathBuf,

    /// JWT algorithm (HS256, HS384, HS512, RS256, RS384, RS512)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// Issuer to validate
    #[serde(default)]
    pub issuer: Option<String>,

    /// Audience to validate
    #[serde(default)]
    pub audience: Option<String>,

    /// Accepted clock skew when checking iat/exp, capped at 60s
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// Maximum token lifetime; subject-wide revocations live this long
    #[serde(default = "default_max_token_lifetime")]
    pub max_token_lifetime_secs: u64,

    /// Extra TTL added to fingerprint revocations beyond remaining lifetime
    #[serde(default = "default_revocation_skew")]
    pub revocation_skew_secs: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis://host:port)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,

    /// Connection name
    #[serde(default)]
    pub name: Option<String>,

    /// Max reconnection attempts
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,

    /// Maximum retry attempts for the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Behavior of the rate-limit engine when the shared cache is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Fall back to an in-process leaky bucket
    FailOpen,
    /// Reject with 503 until the cache returns
    FailClosed,
}

/// Quota algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaAlgorithm {
    /// Counter keyed by (dimension, window-id), TTL on first increment
    FixedWindow,
    /// Token bucket: capacity = burst, refilled at replenish_per_sec
    TokenBucket,
}

/// A single quota specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSpecConfig {
    /// Algorithm applied for this quota
    #[serde(default = "default_quota_algorithm")]
    pub algorithm: QuotaAlgorithm,

    /// Maximum requests per window (fixed) or bucket capacity seed (bucket)
    pub capacity: u64,

    /// Window length in seconds (fixed window only)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Burst size; token bucket capacity
    #[serde(default)]
    pub burst: Option<u64>,

    /// Tokens replenished per second (token bucket only)
    #[serde(default)]
    pub replenish_per_sec: Option<u64>,
}

/// Per-tier limits for API keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Quota applied to keys of this tier
    pub quota: QuotaSpecConfig,

    /// Consecutive violations before a timed block
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u64,

    /// Block duration once the threshold is exceeded
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

/// Rate limit engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Policy when the shared cache is unreachable
    #[serde(default = "default_degraded_mode")]
    pub on_cache_error: DegradedMode,

    /// Roles that skip rate limiting (still counted for observability)
    #[serde(default)]
    pub bypass_roles: Vec<String>,

    /// Per-IP quota (lowest precedence)
    #[serde(default = "default_ip_quota")]
    pub ip: QuotaSpecConfig,

    /// Per-principal quota
    #[serde(default = "default_principal_quota")]
    pub principal: QuotaSpecConfig,

    /// API key tier limit vectors, keyed by tier name (free/standard/premium)
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierConfig>,

    /// API key → tier name table
    #[serde(default)]
    pub api_keys: HashMap<String, String>,

    /// Named quotas referenced by route filters and version overrides
    #[serde(default)]
    pub quotas: HashMap<String, QuotaSpecConfig>,

    /// TTL of the consecutive-violations counter
    #[serde(default = "default_violation_window")]
    pub violation_window_secs: u64,

    /// Violation threshold for non-tier dimensions
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u64,

    /// Block duration for non-tier dimensions
    #[serde(default = "default_block_secs")]
    pub block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            on_cache_error: default_degraded_mode(),
            bypass_roles: Vec::new(),
            ip: default_ip_quota(),
            principal: default_principal_quota(),
            tiers: default_tiers(),
            api_keys: HashMap::new(),
            quotas: HashMap::new(),
            violation_window_secs: default_violation_window(),
            violation_threshold: default_violation_threshold(),
            block_secs: default_block_secs(),
        }
    }
}

/// API versioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Versions this deployment serves, e.g. ["v1", "v2"]
    #[serde(default = "default_available_versions")]
    pub available: Vec<String>,

    /// Version used when the client expresses no preference
    #[serde(default = "default_version")]
    pub default: String,

    /// Versions that still work but advertise deprecation headers
    #[serde(default)]
    pub deprecated: Vec<String>,

    /// Named quota overriding the route default, keyed by version
    #[serde(default)]
    pub quota_overrides: HashMap<String, String>,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            available: default_available_versions(),
            default: default_version(),
            deprecated: Vec::new(),
            quota_overrides: HashMap::new(),
        }
    }
}

/// A filter applied by a matched route, in declared order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RouteFilterConfig {
    /// Reject unauthenticated requests before forwarding
    RequireAuth,
    /// Apply a named quota from `rate_limit.quotas`
    RateLimit { quota: String },
    /// Remove a leading path prefix before forwarding
    StripPrefix { prefix: String },
    /// Replace a matched prefix with another
    RewritePath { from: String, to: String },
    /// Wrap the upstream call in a circuit breaker
    CircuitBreaker {
        #[serde(default)]
        name: Option<String>,
    },
    /// Add static headers to the upstream request
    InjectHeaders { headers: HashMap<String, String> },
}

/// A single gateway route definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Stable route identifier, used in logs and breaker keys
    pub id: String,

    /// Path glob: `/prefix/**` and single-segment `*` wildcards
    pub path: String,

    /// Header equality predicates (names are case-insensitive)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Query parameter equality predicates
    #[serde(default)]
    pub query: HashMap<String, String>,

    /// Explicit API version selector (e.g. "v2")
    #[serde(default)]
    pub version: Option<String>,

    /// Upstream base URL (http(s)://host[:port])
    pub target: String,

    /// Filters applied in declared order
    #[serde(default)]
    pub filters: Vec<RouteFilterConfig>,

    /// Target explicitly marked degraded; requests receive 503
    #[serde(default)]
    pub degraded: bool,
}

/// Gateway route table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Ordered route definitions; first match wins
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Path globs that bypass authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

/// Upstream forwarding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Total upstream request deadline in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept per upstream host
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// Request headers forwarded upstream in addition to identity headers
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    /// Bounded in-flight frames per WebSocket relay direction
    #[serde(default = "default_ws_buffer")]
    pub ws_buffer_frames: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
            allowed_headers: default_allowed_headers(),
            ws_buffer_frames: default_ws_buffer(),
        }
    }
}

impl ProxyConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Circuit breaker defaults, overridable per target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failure ratio that opens the circuit (0.0-1.0)
    #[serde(default = "default_breaker_threshold")]
    pub failure_ratio: f64,

    /// Minimum samples in the window before the ratio is evaluated
    #[serde(default = "default_breaker_min_requests")]
    pub min_requests: u64,

    /// Rolling window length in seconds
    #[serde(default = "default_breaker_window")]
    pub window_secs: u64,

    /// Time the circuit stays open before allowing probes
    #[serde(default = "default_breaker_cooldown")]
    pub cooldown_secs: u64,

    /// Probe budget while half-open
    #[serde(default = "default_breaker_probes")]
    pub half_open_probes: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_ratio: default_breaker_threshold(),
            min_requests: default_breaker_min_requests(),
            window_secs: default_breaker_window(),
            cooldown_secs: default_breaker_cooldown(),
            half_open_probes: default_breaker_probes(),
        }
    }
}

/// Notification core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Maximum title length in characters
    #[serde(default = "default_max_title")]
    pub max_title_len: usize,

    /// Maximum content length in characters
    #[serde(default = "default_max_content")]
    pub max_content_len: usize,

    /// Maximum action URL length in characters
    #[serde(default = "default_max_action_url")]
    pub max_action_url_len: usize,

    /// Upper bound on the `size` query parameter of list endpoints
    #[serde(default = "default_page_size_cap")]
    pub page_size_cap: usize,

    /// Interval of the digest flush scheduler
    #[serde(default = "default_digest_flush")]
    pub digest_flush_secs: u64,

    /// Retention of persisted notification records in seconds
    #[serde(default = "default_notification_ttl")]
    pub record_ttl_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_title_len: default_max_title(),
            max_content_len: default_max_content(),
            max_action_url_len: default_max_action_url(),
            page_size_cap: default_page_size_cap(),
            digest_flush_secs: default_digest_flush(),
            record_ttl_secs: default_notification_ttl(),
        }
    }
}

/// Template store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    /// Language used when a requested language has no template
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Seed the built-in English catalogue at startup
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            seed_defaults: true,
        }
    }
}

/// Outbound producer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Subject namespace routing keys are published under
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Dead-letter subject prefix
    #[serde(default = "default_dlx_prefix")]
    pub dlx_prefix: String,

    /// Maximum republish attempts before dead-lettering
    #[serde(default = "default_producer_retries")]
    pub max_retries: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            subject_prefix: default_subject_prefix(),
            dlx_prefix: default_dlx_prefix(),
            max_retries: default_producer_retries(),
        }
    }
}

/// HTTP middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Enable panic recovery middleware
    #[serde(default = "default_true")]
    pub catch_panic: bool,

    /// Enable compression
    #[serde(default = "default_true")]
    pub compression: bool,

    /// CORS configuration
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

fn default_clock_skew() -> u64 {
    60
}

fn default_max_token_lifetime() -> u64 {
    7 * 24 * 3600
}

fn default_revocation_skew() -> u64 {
    30
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_max_reconnects() -> usize {
    10
}

fn default_degraded_mode() -> DegradedMode {
    DegradedMode::FailClosed
}

fn default_quota_algorithm() -> QuotaAlgorithm {
    QuotaAlgorithm::FixedWindow
}

fn default_window_secs() -> u64 {
    60
}

fn default_violation_window() -> u64 {
    3600
}

fn default_violation_threshold() -> u64 {
    5
}

fn default_block_secs() -> u64 {
    300
}

fn default_ip_quota() -> QuotaSpecConfig {
    QuotaSpecConfig {
        algorithm: QuotaAlgorithm::FixedWindow,
        capacity: 120,
        window_secs: 60,
        burst: None,
        replenish_per_sec: None,
    }
}

fn default_principal_quota() -> QuotaSpecConfig {
    QuotaSpecConfig {
        algorithm: QuotaAlgorithm::FixedWindow,
        capacity: 200,
        window_secs: 60,
        burst: None,
        replenish_per_sec: None,
    }
}

fn default_tiers() -> HashMap<String, TierConfig> {
    let mut tiers = HashMap::new();
    tiers.insert(
        "free".to_string(),
        TierConfig {
            quota: QuotaSpecConfig {
                algorithm: QuotaAlgorithm::FixedWindow,
                capacity: 60,
                window_secs: 60,
                burst: None,
                replenish_per_sec: None,
            },
            violation_threshold: 3,
            block_secs: 600,
        },
    );
    tiers.insert(
        "standard".to_string(),
        TierConfig {
            quota: QuotaSpecConfig {
                algorithm: QuotaAlgorithm::FixedWindow,
                capacity: 300,
                window_secs: 60,
                burst: None,
                replenish_per_sec: None,
            },
            violation_threshold: 5,
            block_secs: 300,
        },
    );
    tiers.insert(
        "premium".to_string(),
        TierConfig {
            quota: QuotaSpecConfig {
                algorithm: QuotaAlgorithm::TokenBucket,
                capacity: 1000,
                window_secs: 60,
                burst: Some(100),
                replenish_per_sec: Some(20),
            },
            violation_threshold: 10,
            block_secs: 60,
        },
    );
    tiers
}

fn default_available_versions() -> Vec<String> {
    vec!["v1".to_string()]
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_public_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/health/**".to_string(),
        "/auth/token/validate/public".to_string(),
    ]
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_pool_max_idle() -> usize {
    32
}

fn default_allowed_headers() -> Vec<String> {
    vec![
        "accept".to_string(),
        "accept-language".to_string(),
        "content-type".to_string(),
        "content-length".to_string(),
        "x-correlation-id".to_string(),
        "x-request-id".to_string(),
    ]
}

fn default_ws_buffer() -> usize {
    32
}

fn default_breaker_threshold() -> f64 {
    0.5
}

fn default_breaker_min_requests() -> u64 {
    10
}

fn default_breaker_window() -> u64 {
    30
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_breaker_probes() -> u64 {
    3
}

fn default_max_title() -> usize {
    200
}

fn default_max_content() -> usize {
    5000
}

fn default_max_action_url() -> usize {
    500
}

fn default_page_size_cap() -> usize {
    100
}

fn default_digest_flush() -> u64 {
    300
}

fn default_notification_ttl() -> u64 {
    30 * 24 * 3600
}

fn default_language() -> String {
    "en".to_string()
}

fn default_subject_prefix() -> String {
    "notification".to_string()
}

fn default_dlx_prefix() -> String {
    "notification.dlx".to_string()
}

fn default_producer_retries() -> u32 {
    3
}

fn default_body_limit_mb() -> usize {
    10
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge config files in reverse order (lowest priority first)
        // so that higher priority files override lower ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // Environment variables have highest priority
        figment = figment.merge(Env::prefixed("HIVE_EDGE_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the XDG search; useful for tests and non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HIVE_EDGE_").split("_"))
            .extract()?;

        Ok(config)
    }

    /// Find all possible config file paths
    ///
    /// Returns paths in priority order (highest first).
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Current working directory (highest priority for dev/testing)
        paths.push(PathBuf::from("config.toml"));

        // 2. XDG config directory (~/.config/hive-edge/config.toml)
        let xdg_dirs = xdg::BaseDirectories::with_prefix("hive-edge");
        if let Ok(path) = xdg_dirs.place_config_file("config.toml") {
            paths.push(path);
        }

        // 3. System-wide directory
        paths.push(PathBuf::from("/etc/hive-edge/config.toml"));

        paths
    }

    /// Request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "hive-edge".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
            },
            jwt: JwtConfig {
                key_path: PathBuf::from("./keys/jwt.key"),
                algorithm: default_jwt_algorithm(),
                issuer: None,
                audience: None,
                clock_skew_secs: default_clock_skew(),
                max_token_lifetime_secs: default_max_token_lifetime(),
                revocation_skew_secs: default_revocation_skew(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                max_connections: default_redis_max_connections(),
                connection_timeout_secs: default_connection_timeout(),
                max_retries: default_max_retries(),
                retry_delay_secs: default_retry_delay(),
            },
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                name: Some("hive-edge".to_string()),
                max_reconnects: default_max_reconnects(),
                max_retries: default_max_retries(),
                retry_delay_secs: default_retry_delay(),
            },
            rate_limit: RateLimitConfig::default(),
            versioning: VersioningConfig::default(),
            gateway: GatewayConfig {
                routes: Vec::new(),
                public_paths: default_public_paths(),
            },
            proxy: ProxyConfig::default(),
            breaker: BreakerConfig::default(),
            notification: NotificationConfig::default(),
            templates: TemplatesConfig::default(),
            producer: ProducerConfig::default(),
            middleware: MiddlewareConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.rate_limit.on_cache_error, DegradedMode::FailClosed);
        assert_eq!(config.templates.default_language, "en");
        assert_eq!(config.versioning.default, "v1");
        assert_eq!(config.notification.max_title_len, 200);
        assert_eq!(config.notification.max_content_len, 5000);
        assert_eq!(config.producer.subject_prefix, "notification");
    }

    #[test]
    fn test_default_tiers() {
        let config = Config::default();
        let free = config.rate_limit.tiers.get("free").unwrap();
        let premium = config.rate_limit.tiers.get("premium").unwrap();
        assert!(free.quota.capacity < premium.quota.capacity);
        assert!(free.block_secs > premium.block_secs);
        assert_eq!(premium.quota.algorithm, QuotaAlgorithm::TokenBucket);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "edge-test"
port = 9999

[rate_limit]
on_cache_error = "fail_open"
bypass_roles = ["EMERGENCY_OPS"]

[[gateway.routes]]
id = "hives"
path = "/hives/**"
target = "http://hive-service:8081"
filters = [{{ type = "require-auth" }}, {{ type = "rate-limit", quota = "hive-read" }}]

[rate_limit.quotas.hive-read]
capacity = 50
window_secs = 60
"#
        )
        .unwrap();

        let config = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.service.name, "edge-test");
        assert_eq!(config.service.port, 9999);
        assert_eq!(config.rate_limit.on_cache_error, DegradedMode::FailOpen);
        assert_eq!(config.rate_limit.bypass_roles, vec!["EMERGENCY_OPS"]);
        assert_eq!(config.gateway.routes.len(), 1);
        let route = &config.gateway.routes[0];
        assert_eq!(route.id, "hives");
        assert_eq!(route.filters.len(), 2);
        assert!(matches!(route.filters[0], RouteFilterConfig::RequireAuth));
        assert!(config.rate_limit.quotas.contains_key("hive-read"));
    }

    #[test]
    fn test_quota_spec_parsing() {
        let spec: QuotaSpecConfig = serde_json::from_value(serde_json::json!({
            "algorithm": "token-bucket",
            "capacity": 100,
            "burst": 20,
            "replenish_per_sec": 5
        }))
        .unwrap();
        assert_eq!(spec.algorithm, QuotaAlgorithm::TokenBucket);
        assert_eq!(spec.burst, Some(20));
        assert_eq!(spec.replenish_per_sec, Some(5));
    }

    #[test]
    fn test_public_paths_default() {
        let config = Config::default();
        assert!(config
            .gateway
            .public_paths
            .iter()
            .any(|p| p == "/health/**"));
    }
}
