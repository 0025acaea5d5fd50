//! Quota dimensions, tiers, and decisions

use std::fmt;

use crate::config::{QuotaAlgorithm, QuotaSpecConfig};

/// API key tiers; each uniquely determines a limit vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKeyTier {
    Free,
    Standard,
    Premium,
}

impl ApiKeyTier {
    /// Parse a configured tier name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "standard" => Some(Self::Standard),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for ApiKeyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The (subject-kind, value) tuple counters are keyed by
///
/// Precedence when several apply to one request:
/// route-specific > API-key tier > principal > IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// A named route/version quota scoped to the calling subject
    Route { quota: String, subject: String },
    /// An API key with its resolved tier
    ApiKey { key: String, tier: ApiKeyTier },
    /// An authenticated principal
    Principal(String),
    /// A client IP address
    Ip(String),
}

impl Dimension {
    /// Stable key fragment used in cache keys and logs
    pub fn key(&self) -> String {
        match self {
            Dimension::Route { quota, subject } => format!("route:{}:{}", quota, subject),
            Dimension::ApiKey { key, .. } => format!("key:{}", key),
            Dimension::Principal(id) => format!("principal:{}", id),
            Dimension::Ip(ip) => format!("ip:{}", ip),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Dimension::Route { .. } => "route",
            Dimension::ApiKey { .. } => "key",
            Dimension::Principal(_) => "principal",
            Dimension::Ip(_) => "ip",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Runtime quota derived from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaSpec {
    pub algorithm: QuotaAlgorithm,
    /// Window capacity (fixed) or sustained ceiling (bucket)
    pub capacity: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Bucket capacity; defaults to `capacity` when unset
    pub burst: u64,
    /// Tokens replenished per second
    pub replenish_per_sec: u64,
}

impl From<&QuotaSpecConfig> for QuotaSpec {
    fn from(config: &QuotaSpecConfig) -> Self {
        let burst = config.burst.unwrap_or(config.capacity).max(1);
        let replenish_per_sec = config
            .replenish_per_sec
            .unwrap_or_else(|| (config.capacity / config.window_secs.max(1)).max(1));
        Self {
            algorithm: config.algorithm,
            capacity: config.capacity.max(1),
            window_secs: config.window_secs.max(1),
            burst,
            replenish_per_sec,
        }
    }
}

impl QuotaSpec {
    /// The advertised limit for rate-limit headers
    pub fn limit(&self) -> u64 {
        match self.algorithm {
            QuotaAlgorithm::FixedWindow => self.capacity,
            QuotaAlgorithm::TokenBucket => self.burst,
        }
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Capacity of the controlling quota
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds when the window resets
    pub reset_ms: i64,
    /// Seconds until a retry may succeed (0 when allowed)
    pub retry_after_secs: u64,
    /// Request skipped enforcement via a bypass role
    pub bypassed: bool,
}

impl Decision {
    pub fn bypass() -> Self {
        Self {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_ms: 0,
            retry_after_secs: 0,
            bypassed: true,
        }
    }
}
