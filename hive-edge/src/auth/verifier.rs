//! Bearer token verification
//!
//! `verify` checks segment structure, signature (HMAC or RSA family),
//! temporal validity with bounded clock skew, and finally the revocation
//! set. Failures carry one of the stable reasons consumed by the session
//! service's validate endpoint; HTTP responses collapse them all to the
//! same 401 body.

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::{fmt, fs};

use super::claims::Claims;
use super::revocation::RevocationStore;
use crate::{config::JwtConfig, error::Error};

/// Why verification failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// No Authorization header present
    Missing,
    /// Unknown scheme, empty payload, or wrong segment count
    Malformed,
    /// Signature does not verify under the configured key
    BadSignature,
    /// Outside `iat ≤ now ≤ exp` (with skew)
    Expired,
    /// Fingerprint or subject-wide revocation hit
    Revoked,
    /// Revocation set unreachable; infrastructure, not a token verdict
    Unavailable(String),
}

impl VerifyFailure {
    /// Stable reason string for validate responses and logs
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyFailure::Missing => "missing",
            VerifyFailure::Malformed => "malformed",
            VerifyFailure::BadSignature => "bad_signature",
            VerifyFailure::Expired => "expired",
            VerifyFailure::Revoked => "revoked",
            VerifyFailure::Unavailable(_) => "unavailable",
        }
    }
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyFailure::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            other => write!(f, "{}", other.reason()),
        }
    }
}

impl From<VerifyFailure> for Error {
    fn from(failure: VerifyFailure) -> Self {
        match failure {
            VerifyFailure::Unavailable(msg) => Error::Unavailable(msg),
            _ => Error::Unauthorized("Valid JWT token required".to_string()),
        }
    }
}

/// A successfully verified token
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Raw compact form, needed for logout fingerprinting
    pub raw: String,
    /// Decoded claims
    pub claims: Claims,
}

/// Token verifier for the edge trust chain
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: Arc<DecodingKey>,
    validation: Validation,
    clock_skew_secs: u64,
    revocation: Option<RevocationStore>,
}

impl TokenVerifier {
    /// Create a verifier from configuration, reading the key material file
    pub fn from_config(config: &JwtConfig) -> Result<Self, Error> {
        let key_bytes = fs::read(&config.key_path).map_err(|e| {
            Error::Config(Box::new(figment::Error::from(format!(
                "Failed to read JWT key from '{}': {}",
                config.key_path.display(),
                e
            ))))
        })?;

        let algorithm = parse_algorithm(&config.algorithm)?;
        let decoding_key = match algorithm {
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(&key_bytes)?
            }
            _ => DecodingKey::from_secret(&key_bytes),
        };

        Ok(Self::build(decoding_key, algorithm, config))
    }

    /// Create an HMAC verifier from an in-memory secret
    pub fn with_secret(secret: &[u8], config: &JwtConfig) -> Result<Self, Error> {
        let algorithm = parse_algorithm(&config.algorithm)?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {}
            other => {
                return Err(Error::Config(Box::new(figment::Error::from(format!(
                    "Secret-based verifier requires an HMAC algorithm, got {:?}",
                    other
                )))))
            }
        }
        Ok(Self::build(
            DecodingKey::from_secret(secret),
            algorithm,
            config,
        ))
    }

    fn build(decoding_key: DecodingKey, algorithm: Algorithm, config: &JwtConfig) -> Self {
        // The platform caps accepted skew at 60 seconds
        let clock_skew_secs = config.clock_skew_secs.min(60);

        let mut validation = Validation::new(algorithm);
        validation.leeway = clock_skew_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key: Arc::new(decoding_key),
            validation,
            clock_skew_secs,
            revocation: None,
        }
    }

    /// Attach the revocation set consulted after signature and time checks
    pub fn with_revocation(mut self, revocation: RevocationStore) -> Self {
        self.revocation = Some(revocation);
        self
    }

    /// Extract the bearer token from request headers
    ///
    /// A present-but-broken Authorization header is `Malformed`, never
    /// `Missing`.
    pub fn extract_bearer(headers: &HeaderMap) -> Result<String, VerifyFailure> {
        let header = headers
            .get("authorization")
            .ok_or(VerifyFailure::Missing)?
            .to_str()
            .map_err(|_| VerifyFailure::Malformed)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(VerifyFailure::Malformed)?
            .trim();

        if token.is_empty() {
            return Err(VerifyFailure::Malformed);
        }

        Ok(token.to_string())
    }

    /// Verify a raw token and produce its claims
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyFailure> {
        if token.split('.').count() != 3 {
            return Err(VerifyFailure::Malformed);
        }

        let data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
                |e| match e.kind() {
                    ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
                        VerifyFailure::Expired
                    }
                    ErrorKind::InvalidSignature => VerifyFailure::BadSignature,
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                        VerifyFailure::BadSignature
                    }
                    _ => VerifyFailure::Malformed,
                },
            )?;

        let claims = data.claims;

        // jsonwebtoken covers exp; iat in the future is a temporal failure
        if let Some(iat) = claims.iat {
            let now = Utc::now().timestamp();
            if iat > now + self.clock_skew_secs as i64 {
                return Err(VerifyFailure::Expired);
            }
        }

        if let Some(revocation) = &self.revocation {
            let revoked = revocation
                .is_revoked(token, &claims.sub, claims.iat)
                .await
                .map_err(|e| VerifyFailure::Unavailable(e.to_string()))?;
            if revoked {
                return Err(VerifyFailure::Revoked);
            }
        }

        if claims.sub.is_empty() {
            return Err(VerifyFailure::Malformed);
        }

        Ok(VerifiedToken {
            raw: token.to_string(),
            claims,
        })
    }

    /// Extract and verify in one step
    pub async fn verify_headers(&self, headers: &HeaderMap) -> Result<VerifiedToken, VerifyFailure> {
        let token = Self::extract_bearer(headers)?;
        self.verify(&token).await
    }
}

fn parse_algorithm(alg: &str) -> Result<Algorithm, Error> {
    match alg.to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(Error::Config(Box::new(figment::Error::from(format!(
            "Unsupported JWT algorithm: {}",
            other
        ))))),
    }
}
