//! Session service endpoints: logout, session-wide revocation, validation

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::verifier::{VerifiedToken, VerifyFailure};
use crate::{
    error::{Error, Result},
    state::AppState,
};

/// Response body for validate endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PublicValidateRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// `POST /auth/logout` — blacklist the presented token
///
/// The fingerprint entry outlives the token by the configured skew so a
/// revocation never expires before the token it covers.
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<VerifiedToken>,
) -> Result<Json<LogoutResponse>> {
    let now = Utc::now().timestamp();
    let remaining = (token.claims.exp - now).max(0) as u64;
    let ttl = Duration::from_secs(remaining + state.config.jwt.revocation_skew_secs);

    state.revocation.revoke_token(&token.raw, ttl).await?;

    tracing::info!(subject = %token.claims.sub, "Session token revoked");
    Ok(Json(LogoutResponse {
        message: "Logged out".to_string(),
    }))
}

/// `POST /auth/logout/all` — revoke every token of the subject
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(token): Extension<VerifiedToken>,
) -> Result<Json<LogoutResponse>> {
    let ttl = Duration::from_secs(state.config.jwt.max_token_lifetime_secs);
    state
        .revocation
        .revoke_subject(&token.claims.sub, Utc::now().timestamp(), ttl)
        .await?;

    tracing::info!(subject = %token.claims.sub, "All sessions revoked for subject");
    Ok(Json(LogoutResponse {
        message: "All sessions logged out".to_string(),
    }))
}

/// `POST /auth/token/validate` — authenticated introspection
pub async fn validate(
    Extension(token): Extension<VerifiedToken>,
) -> Json<ValidateResponse> {
    Json(ValidateResponse {
        valid: true,
        subject: Some(token.claims.sub.clone()),
        exp: Some(token.claims.exp),
        iat: token.claims.iat,
        reason: None,
    })
}

/// `POST /auth/token/validate/public` — body-carried token check
///
/// Missing or malformed tokens are 400; any other verification failure is
/// 401.
pub async fn validate_public(
    State(state): State<AppState>,
    Json(body): Json<PublicValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let token = body
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::Validation("Token is required".to_string()))?;

    match state.verifier.verify(&token).await {
        Ok(verified) => Ok(Json(ValidateResponse {
            valid: true,
            subject: Some(verified.claims.sub),
            exp: Some(verified.claims.exp),
            iat: verified.claims.iat,
            reason: None,
        })),
        Err(VerifyFailure::Missing) | Err(VerifyFailure::Malformed) => {
            Err(Error::Validation("Malformed token".to_string()))
        }
        Err(VerifyFailure::Unavailable(msg)) => Err(Error::Unavailable(msg)),
        Err(failure) => Err(Error::Unauthorized(format!(
            "Token validation failed: {}",
            failure.reason()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_response_omits_empty_fields() {
        let response = ValidateResponse {
            valid: true,
            subject: Some("user-1".to_string()),
            exp: Some(100),
            iat: None,
            reason: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["subject"], "user-1");
        assert!(json.get("iat").is_none());
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn test_public_validate_request_accepts_missing_token() {
        let body: PublicValidateRequest = serde_json::from_str("{}").unwrap();
        assert!(body.token.is_none());

        let body: PublicValidateRequest =
            serde_json::from_str(r#"{"token": "a.b.c"}"#).unwrap();
        assert_eq!(body.token.as_deref(), Some("a.b.c"));
    }
}
