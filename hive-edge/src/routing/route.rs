//! Route definitions and the hot-reloadable route table
//!
//! Routes are loaded at startup and evaluated in declared order; the first
//! matching predicate set wins. Reload publishes a fresh snapshot
//! atomically, so readers never observe a partially updated table and no
//! lock is held across an await point.

use axum::http::HeaderMap;
use regex::Regex;
use std::sync::{Arc, RwLock};

use super::matcher::compile_glob;
use super::version::ApiVersion;
use crate::config::{GatewayConfig, RouteConfig, RouteFilterConfig};
use crate::error::{Error, Result};

/// A compiled gateway route
#[derive(Debug, Clone)]
pub struct Route {
    /// Stable identifier for logs and breaker keys
    pub id: String,

    /// Original path glob, kept for diagnostics
    pub path_pattern: String,

    /// Compiled path predicate
    path_regex: Regex,

    /// Header equality predicates; names pre-lowercased
    headers: Vec<(String, String)>,

    /// Query equality predicates
    query: Vec<(String, String)>,

    /// Explicit version selector
    pub version: Option<ApiVersion>,

    /// Upstream base URL
    pub target: String,

    /// Filters applied in declared order
    pub filters: Vec<RouteFilterConfig>,

    /// Target explicitly marked degraded
    pub degraded: bool,
}

impl Route {
    fn compile(config: &RouteConfig) -> Result<Self> {
        let version = match &config.version {
            Some(raw) => Some(ApiVersion::parse(raw).ok_or_else(|| {
                Error::Config(Box::new(figment::Error::from(format!(
                    "Route '{}' declares unknown version '{}'",
                    config.id, raw
                ))))
            })?),
            None => None,
        };

        Ok(Self {
            id: config.id.clone(),
            path_pattern: config.path.clone(),
            path_regex: compile_glob(&config.path)?,
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
            query: config
                .query
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            version,
            target: config.target.trim_end_matches('/').to_string(),
            filters: config.filters.clone(),
            degraded: config.degraded,
        })
    }

    /// Evaluate every predicate of this route
    pub fn matches(
        &self,
        path: &str,
        headers: &HeaderMap,
        query_pairs: &[(String, String)],
        version: ApiVersion,
    ) -> bool {
        if !self.path_regex.is_match(path) {
            return false;
        }

        for (name, expected) in &self.headers {
            let actual = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
            if actual != Some(expected.as_str()) {
                return false;
            }
        }

        for (name, expected) in &self.query {
            let found = query_pairs
                .iter()
                .any(|(k, v)| k == name && v == expected);
            if !found {
                return false;
            }
        }

        if let Some(required) = self.version {
            if required != version {
                return false;
            }
        }

        true
    }

    /// The named quota declared by this route's rate-limit filter
    pub fn rate_limit_quota(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            RouteFilterConfig::RateLimit { quota } => Some(quota.as_str()),
            _ => None,
        })
    }

    /// Whether this route requires an authenticated principal
    pub fn requires_auth(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, RouteFilterConfig::RequireAuth))
    }

    /// Whether upstream calls run under a circuit breaker, and its key
    pub fn breaker_name(&self) -> Option<String> {
        self.filters.iter().find_map(|f| match f {
            RouteFilterConfig::CircuitBreaker { name } => {
                Some(name.clone().unwrap_or_else(|| self.target.clone()))
            }
            _ => None,
        })
    }

    /// Static headers injected by this route's filters
    pub fn injected_headers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.filters.iter().flat_map(|f| match f {
            RouteFilterConfig::InjectHeaders { headers } => {
                Some(headers.iter())
            }
            _ => None,
        })
        .flatten()
    }

    /// Apply this route's rewrite filters, in declared order
    ///
    /// Rewrites are idempotent on already-rewritten paths: a strip whose
    /// prefix is gone, or a rewrite whose `from` no longer matches, is a
    /// no-op.
    pub fn rewrite(&self, path: &str) -> String {
        let mut current = path.to_string();
        for filter in &self.filters {
            match filter {
                RouteFilterConfig::StripPrefix { prefix } => {
                    if let Some(rest) = current.strip_prefix(prefix.as_str()) {
                        current = if rest.starts_with('/') {
                            rest.to_string()
                        } else {
                            format!("/{}", rest)
                        };
                    }
                }
                RouteFilterConfig::RewritePath { from, to } => {
                    if let Some(rest) = current.strip_prefix(from.as_str()) {
                        current = format!("{}{}", to, rest);
                    }
                }
                _ => {}
            }
        }
        current
    }
}

/// Process-wide route table with atomic snapshot swap
pub struct RouteTable {
    inner: RwLock<Arc<Vec<Route>>>,
}

impl RouteTable {
    /// Compile the table from configuration
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let routes = Self::compile(config)?;
        Ok(Self {
            inner: RwLock::new(Arc::new(routes)),
        })
    }

    fn compile(config: &GatewayConfig) -> Result<Vec<Route>> {
        config.routes.iter().map(Route::compile).collect()
    }

    /// A consistent pointer to the current route list
    pub fn snapshot(&self) -> Arc<Vec<Route>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Publish a new snapshot; readers in flight keep the old one
    pub fn reload(&self, config: &GatewayConfig) -> Result<()> {
        let routes = Self::compile(config)?;
        let count = routes.len();
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(routes);
        tracing::info!(routes = count, "Route table reloaded");
        Ok(())
    }

    /// Resolve the first route whose predicates all hold
    pub fn resolve(
        &self,
        path: &str,
        headers: &HeaderMap,
        query_pairs: &[(String, String)],
        version: ApiVersion,
    ) -> Option<Route> {
        let snapshot = self.snapshot();
        snapshot
            .iter()
            .find(|r| r.matches(path, headers, query_pairs, version))
            .cloned()
    }
}
