//! JWT claims and the request principal

use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

/// Fixed identifier injected as `X-Auth-Provider` on forwarded requests
pub const AUTH_PROVIDER: &str = "hive-edge";

/// Upstream identity headers
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USERNAME_HEADER: &str = "x-username";
pub const ROLES_HEADER: &str = "x-user-roles";
pub const PERSONA_HEADER: &str = "x-persona-id";
pub const PROVIDER_HEADER: &str = "x-auth-provider";

/// JWT claims carried by platform tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// Username (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Roles, insertion order preserved
    #[serde(default)]
    pub roles: Vec<String>,

    /// Persona/tenant ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Issuer (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Token type (e.g. "refresh")
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// JWT ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    /// Check if the token has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether this is a refresh token rather than an access token
    pub fn is_refresh(&self) -> bool {
        self.token_type.as_deref() == Some("refresh")
    }
}

/// The authenticated identity attached to a request
///
/// Derived from token verification; lives for the request only.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Subject identifier; never empty
    pub id: String,

    /// Display name; falls back to the subject
    pub username: String,

    /// Closed, non-null role set in token order
    pub roles: Vec<String>,

    /// Persona/tenant identifier
    pub persona_id: Option<String>,

    /// Token issuer
    pub issuer: Option<String>,
}

impl Principal {
    /// Build a principal from verified claims
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            id: claims.sub.clone(),
            username: claims
                .username
                .clone()
                .unwrap_or_else(|| claims.sub.clone()),
            roles: claims.roles.clone(),
            persona_id: claims.persona_id.clone(),
            issuer: claims.iss.clone(),
        }
    }

    /// Check if the principal has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Roles comma-joined in insertion order for the upstream header
    pub fn roles_header(&self) -> String {
        self.roles.join(",")
    }

    /// Append the identity headers injected on forwarded requests
    pub fn inject_headers(&self, headers: &mut HeaderMap) {
        headers.insert(USER_ID_HEADER, header_value(&self.id));
        headers.insert(USERNAME_HEADER, header_value(&self.username));
        headers.insert(ROLES_HEADER, header_value(&self.roles_header()));
        headers.insert(
            PERSONA_HEADER,
            header_value(self.persona_id.as_deref().unwrap_or("")),
        );
        headers.insert(PROVIDER_HEADER, HeaderValue::from_static(AUTH_PROVIDER));
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            sub: "user-123".to_string(),
            username: Some("testuser".to_string()),
            roles: vec!["USER".to_string(), "PREMIUM".to_string()],
            persona_id: Some("p-1".to_string()),
            exp: 0,
            iat: None,
            iss: Some("hive-identity".to_string()),
            aud: None,
            token_type: None,
            jti: None,
        }
    }

    #[test]
    fn test_principal_from_claims() {
        let principal = Principal::from_claims(&claims());
        assert_eq!(principal.id, "user-123");
        assert_eq!(principal.username, "testuser");
        assert!(principal.has_role("USER"));
        assert!(principal.has_role("PREMIUM"));
        assert!(!principal.has_role("ADMIN"));
    }

    #[test]
    fn test_username_falls_back_to_subject() {
        let mut c = claims();
        c.username = None;
        let principal = Principal::from_claims(&c);
        assert_eq!(principal.username, "user-123");
    }

    #[test]
    fn test_roles_header_preserves_insertion_order() {
        let principal = Principal::from_claims(&claims());
        assert_eq!(principal.roles_header(), "USER,PREMIUM");
    }

    #[test]
    fn test_inject_headers() {
        let principal = Principal::from_claims(&claims());
        let mut headers = HeaderMap::new();
        principal.inject_headers(&mut headers);

        assert_eq!(headers.get(USER_ID_HEADER).unwrap(), "user-123");
        assert_eq!(headers.get(USERNAME_HEADER).unwrap(), "testuser");
        assert_eq!(headers.get(ROLES_HEADER).unwrap(), "USER,PREMIUM");
        assert_eq!(headers.get(PERSONA_HEADER).unwrap(), "p-1");
        assert_eq!(headers.get(PROVIDER_HEADER).unwrap(), "hive-edge");
    }

    #[test]
    fn test_empty_persona_header_when_absent() {
        let mut c = claims();
        c.persona_id = None;
        let principal = Principal::from_claims(&c);
        let mut headers = HeaderMap::new();
        principal.inject_headers(&mut headers);
        assert_eq!(headers.get(PERSONA_HEADER).unwrap(), "");
    }

    #[test]
    fn test_refresh_token_detection() {
        let mut c = claims();
        assert!(!c.is_refresh());
        c.token_type = Some("refresh".to_string());
        assert!(c.is_refresh());
    }
}
