//! API version negotiation
//!
//! Resolution precedence: explicit path segment (`/vN/...`) >
//! `Accept-Version` header (quality-weighted list) > `version` query
//! parameter > configured default. Negotiation picks the highest-weighted
//! mutually available version; with nothing mutually available the request
//! is not acceptable.

use axum::http::{header, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// API version identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    V1,
    V2,
    V3,
}

impl ApiVersion {
    /// Parse a version from "v1", "V1", or "1"
    pub fn parse(s: &str) -> Option<Self> {
        let lowercase = s.trim().to_lowercase();
        let normalized = lowercase.trim_start_matches('v');
        match normalized {
            "1" => Some(Self::V1),
            "2" => Some(Self::V2),
            "3" => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_number(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Version as a path segment (e.g. "v2")
    pub fn as_path_segment(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
            Self::V3 => "v3",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_path_segment())
    }
}

/// Where the negotiated version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Path,
    Header,
    Query,
    Default,
}

/// Outcome of version negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub version: ApiVersion,
    pub source: VersionSource,
}

/// Compiled versioning policy
#[derive(Debug, Clone)]
pub struct VersionPolicy {
    available: Vec<ApiVersion>,
    default: ApiVersion,
    deprecated: Vec<ApiVersion>,
}

impl VersionPolicy {
    /// Build from configured version names; unknown names are rejected
    pub fn from_config(config: &crate::config::VersioningConfig) -> Result<Self> {
        let mut available = Vec::new();
        for name in &config.available {
            let version = ApiVersion::parse(name).ok_or_else(|| {
                Error::Config(Box::new(figment::Error::from(format!(
                    "Unknown API version in versioning.available: {}",
                    name
                ))))
            })?;
            if !available.contains(&version) {
                available.push(version);
            }
        }
        if available.is_empty() {
            available.push(ApiVersion::V1);
        }

        let default = ApiVersion::parse(&config.default).ok_or_else(|| {
            Error::Config(Box::new(figment::Error::from(format!(
                "Unknown default API version: {}",
                config.default
            ))))
        })?;

        let deprecated = config
            .deprecated
            .iter()
            .filter_map(|v| ApiVersion::parse(v))
            .collect();

        Ok(Self {
            available,
            default,
            deprecated,
        })
    }

    pub fn is_available(&self, version: ApiVersion) -> bool {
        self.available.contains(&version)
    }

    pub fn is_deprecated(&self, version: ApiVersion) -> bool {
        self.deprecated.contains(&version)
    }

    /// Negotiate the version for a request
    pub fn negotiate(
        &self,
        path: &str,
        headers: &HeaderMap,
        query_version: Option<&str>,
    ) -> Result<Negotiated> {
        // 1. Explicit path segment wins outright
        if let Some(version) = version_from_path(path) {
            if self.is_available(version) {
                return Ok(Negotiated {
                    version,
                    source: VersionSource::Path,
                });
            }
            return Err(Error::VersionNotAcceptable(format!(
                "API version {} is not available",
                version
            )));
        }

        // 2. Accept-Version: quality-weighted list
        if let Some(value) = headers
            .get("accept-version")
            .and_then(|v| v.to_str().ok())
        {
            let candidates = parse_accept_version(value);
            if !candidates.is_empty() {
                let best = candidates
                    .into_iter()
                    .filter(|(v, _)| self.is_available(*v))
                    // Highest weight first; ties break toward the newer version
                    .max_by(|(va, qa), (vb, qb)| {
                        qa.partial_cmp(qb)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(va.cmp(vb))
                    });
                return match best {
                    Some((version, _)) => Ok(Negotiated {
                        version,
                        source: VersionSource::Header,
                    }),
                    None => Err(Error::VersionNotAcceptable(
                        "No mutually acceptable API version".to_string(),
                    )),
                };
            }
        }

        // 3. version query parameter
        if let Some(raw) = query_version {
            if let Some(version) = ApiVersion::parse(raw) {
                if self.is_available(version) {
                    return Ok(Negotiated {
                        version,
                        source: VersionSource::Query,
                    });
                }
                return Err(Error::VersionNotAcceptable(format!(
                    "API version {} is not available",
                    version
                )));
            }
        }

        // 4. Configured default
        Ok(Negotiated {
            version: self.default,
            source: VersionSource::Default,
        })
    }

    /// Attach version response headers; deprecated versions advertise it
    pub fn apply_headers(&self, headers: &mut HeaderMap, version: ApiVersion) {
        headers.insert(
            "API-Version",
            HeaderValue::from_static(version.as_path_segment()),
        );

        if self.is_deprecated(version) {
            headers.insert("Deprecation", HeaderValue::from_static("true"));
            let newest = self.available.iter().max().copied().unwrap_or(version);
            let warning = format!(
                "299 - \"API version {} is deprecated. Please migrate to version {}.\"",
                version, newest
            );
            if let Ok(value) = HeaderValue::from_str(&warning) {
                headers.insert(header::WARNING, value);
            }
        }
    }
}

/// Extract an explicit version from the first path segment
pub fn version_from_path(path: &str) -> Option<ApiVersion> {
    let first = path.trim_start_matches('/').split('/').next()?;
    if first.len() >= 2 && (first.starts_with('v') || first.starts_with('V')) {
        let digits = &first[1..];
        if digits.chars().all(|c| c.is_ascii_digit()) {
            return ApiVersion::parse(first);
        }
    }
    None
}

/// Parse an `Accept-Version` list like `v2, v1;q=0.8`
fn parse_accept_version(value: &str) -> Vec<(ApiVersion, f64)> {
    value
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.trim().split(';');
            let version = ApiVersion::parse(parts.next()?.trim())?;
            let mut quality = 1.0_f64;
            for param in parts {
                let param = param.trim();
                if let Some(q) = param.strip_prefix("q=") {
                    quality = q.parse().unwrap_or(0.0);
                }
            }
            Some((version, quality.clamp(0.0, 1.0)))
        })
        .filter(|(_, q)| *q > 0.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersioningConfig;

    fn policy(available: &[&str], default: &str, deprecated: &[&str]) -> VersionPolicy {
        VersionPolicy::from_config(&VersioningConfig {
            available: available.iter().map(|s| s.to_string()).collect(),
            default: default.to_string(),
            deprecated: deprecated.iter().map(|s| s.to_string()).collect(),
            quota_overrides: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(ApiVersion::parse("v1"), Some(ApiVersion::V1));
        assert_eq!(ApiVersion::parse("V2"), Some(ApiVersion::V2));
        assert_eq!(ApiVersion::parse("3"), Some(ApiVersion::V3));
        assert_eq!(ApiVersion::parse("v99"), None);
        assert_eq!(ApiVersion::parse("vx"), None);
    }

    #[test]
    fn test_version_from_path() {
        assert_eq!(version_from_path("/v2/hives/123"), Some(ApiVersion::V2));
        assert_eq!(version_from_path("/v1"), Some(ApiVersion::V1));
        assert_eq!(version_from_path("/hives/123"), None);
        // "version" is not a version segment
        assert_eq!(version_from_path("/version/123"), None);
    }

    #[test]
    fn test_path_beats_header() {
        let policy = policy(&["v1", "v2"], "v1", &[]);
        let mut headers = HeaderMap::new();
        headers.insert("accept-version", HeaderValue::from_static("v1"));

        let negotiated = policy.negotiate("/v2/hives", &headers, None).unwrap();
        assert_eq!(negotiated.version, ApiVersion::V2);
        assert_eq!(negotiated.source, VersionSource::Path);
    }

    #[test]
    fn test_quality_weighted_header() {
        let policy = policy(&["v1", "v2"], "v1", &[]);
        let mut headers = HeaderMap::new();
        headers.insert(
            "accept-version",
            HeaderValue::from_static("v2, v1;q=0.8"),
        );

        let negotiated = policy.negotiate("/hives/123", &headers, None).unwrap();
        assert_eq!(negotiated.version, ApiVersion::V2);
        assert_eq!(negotiated.source, VersionSource::Header);
    }

    #[test]
    fn test_header_prefers_highest_weight_available() {
        // v3 requested at full weight but only v1 is deployed
        let policy = policy(&["v1"], "v1", &[]);
        let mut headers = HeaderMap::new();
        headers.insert(
            "accept-version",
            HeaderValue::from_static("v3, v1;q=0.5"),
        );

        let negotiated = policy.negotiate("/hives", &headers, None).unwrap();
        assert_eq!(negotiated.version, ApiVersion::V1);
    }

    #[test]
    fn test_no_mutual_version_is_not_acceptable() {
        let policy = policy(&["v1"], "v1", &[]);
        let mut headers = HeaderMap::new();
        headers.insert("accept-version", HeaderValue::from_static("v2, v3;q=0.9"));

        let result = policy.negotiate("/hives", &headers, None);
        assert!(matches!(result, Err(Error::VersionNotAcceptable(_))));
    }

    #[test]
    fn test_unavailable_path_version_is_not_acceptable() {
        let policy = policy(&["v1"], "v1", &[]);
        let result = policy.negotiate("/v3/hives", &HeaderMap::new(), None);
        assert!(matches!(result, Err(Error::VersionNotAcceptable(_))));
    }

    #[test]
    fn test_query_parameter_fallback() {
        let policy = policy(&["v1", "v2"], "v1", &[]);
        let negotiated = policy
            .negotiate("/hives", &HeaderMap::new(), Some("v2"))
            .unwrap();
        assert_eq!(negotiated.version, ApiVersion::V2);
        assert_eq!(negotiated.source, VersionSource::Query);
    }

    #[test]
    fn test_default_when_nothing_expressed() {
        let policy = policy(&["v1", "v2"], "v2", &[]);
        let negotiated = policy.negotiate("/hives", &HeaderMap::new(), None).unwrap();
        assert_eq!(negotiated.version, ApiVersion::V2);
        assert_eq!(negotiated.source, VersionSource::Default);
    }

    #[test]
    fn test_deprecation_headers() {
        let policy = policy(&["v1", "v2"], "v2", &["v1"]);
        let mut headers = HeaderMap::new();
        policy.apply_headers(&mut headers, ApiVersion::V1);

        assert_eq!(headers.get("API-Version").unwrap(), "v1");
        assert_eq!(headers.get("Deprecation").unwrap(), "true");
        let warning = headers.get("warning").unwrap().to_str().unwrap();
        assert!(warning.contains("v1 is deprecated"));
        assert!(warning.contains("version v2"));
    }

    #[test]
    fn test_current_version_has_no_deprecation_headers() {
        let policy = policy(&["v1", "v2"], "v2", &["v1"]);
        let mut headers = HeaderMap::new();
        policy.apply_headers(&mut headers, ApiVersion::V2);

        assert_eq!(headers.get("API-Version").unwrap(), "v2");
        assert!(headers.get("Deprecation").is_none());
        assert!(headers.get("warning").is_none());
    }

    #[test]
    fn test_accept_version_parser() {
        let parsed = parse_accept_version("v2, v1;q=0.8, v3;q=0");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], (ApiVersion::V2, 1.0));
        assert_eq!(parsed[1], (ApiVersion::V1, 0.8));

        // Garbage versions and unparseable weights are dropped
        let parsed = parse_accept_version("vx, , v1;q=bad");
        assert!(parsed.is_empty());

        let parsed = parse_accept_version("vx, v1");
        assert_eq!(parsed, vec![(ApiVersion::V1, 1.0)]);
    }
}
