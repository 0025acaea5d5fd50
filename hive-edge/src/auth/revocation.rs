//! Token revocation set
//!
//! Cache-backed collection of token fingerprints and subject-wide
//! revocations. Fingerprint entries are SETEX-style markers whose TTL
//! covers at least the remaining token lifetime; subject-wide entries store
//! a `not-before` timestamp and revoke every token issued at or before it.

use std::sync::Arc;
use std::time::Duration;

use crate::{cache::Cache, error::Result};

const TOKEN_PREFIX: &str = "auth:revoked:token:";
const SUBJECT_PREFIX: &str = "auth:revoked:subject:";

/// Compute the fingerprint of a raw token
pub fn fingerprint(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// Cache-backed revocation set
#[derive(Clone)]
pub struct RevocationStore {
    cache: Arc<dyn Cache>,
}

impl RevocationStore {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn token_key(fp: &str) -> String {
        format!("{}{}", TOKEN_PREFIX, fp)
    }

    fn subject_key(subject: &str) -> String {
        format!("{}{}", SUBJECT_PREFIX, subject)
    }

    /// Revoke a single token for the rest of its lifetime
    pub async fn revoke_token(&self, token: &str, ttl: Duration) -> Result<()> {
        let key = Self::token_key(&fingerprint(token));
        self.cache.set(&key, "1", Some(ttl)).await?;
        tracing::info!(ttl_secs = ttl.as_secs(), "Token fingerprint revoked");
        Ok(())
    }

    /// Revoke every token of a subject issued at or before `not_before`
    pub async fn revoke_subject(&self, subject: &str, not_before: i64, ttl: Duration) -> Result<()> {
        let key = Self::subject_key(subject);
        self.cache.set(&key, &not_before.to_string(), Some(ttl)).await?;
        tracing::info!(subject = %subject, not_before, "Subject-wide revocation written");
        Ok(())
    }

    /// Direct fingerprint hit
    pub async fn is_token_revoked(&self, token: &str) -> Result<bool> {
        let key = Self::token_key(&fingerprint(token));
        Ok(self.cache.get(&key).await?.is_some())
    }

    /// Subject-wide `not-before` timestamp, when one exists
    pub async fn subject_not_before(&self, subject: &str) -> Result<Option<i64>> {
        let key = Self::subject_key(subject);
        Ok(self
            .cache
            .get(&key)
            .await?
            .and_then(|v| v.parse::<i64>().ok()))
    }

    /// Full revocation check for a verified token
    ///
    /// A token is revoked on a direct fingerprint hit, or when a
    /// subject-wide entry exists with `not_before >= iat`.
    pub async fn is_revoked(&self, token: &str, subject: &str, iat: Option<i64>) -> Result<bool> {
        if self.is_token_revoked(token).await? {
            return Ok(true);
        }

        if let Some(not_before) = self.subject_not_before(subject).await? {
            let issued_at = iat.unwrap_or(i64::MIN);
            if not_before >= issued_at {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn store() -> RevocationStore {
        RevocationStore::new(Arc::new(MemoryCache::new()))
    }

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        let token = "header.payload.signature";
        let fp1 = fingerprint(token);
        let fp2 = fingerprint(token);
        assert_eq!(fp1, fp2);
        assert_ne!(fp1, token);
        assert_eq!(fp1.len(), 64);
    }

    #[tokio::test]
    async fn test_token_revocation_roundtrip() {
        let store = store();
        let token = "a.b.c";

        assert!(!store.is_token_revoked(token).await.unwrap());
        store
            .revoke_token(token, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.is_token_revoked(token).await.unwrap());

        // A different token is unaffected
        assert!(!store.is_token_revoked("x.y.z").await.unwrap());
    }

    #[tokio::test]
    async fn test_subject_wide_revocation_by_iat() {
        let store = store();
        store
            .revoke_subject("user-1", 1_000, Duration::from_secs(60))
            .await
            .unwrap();

        // Issued before the cut → revoked
        assert!(store.is_revoked("a.b.c", "user-1", Some(900)).await.unwrap());
        // Issued exactly at the cut → revoked
        assert!(store
            .is_revoked("a.b.c", "user-1", Some(1_000))
            .await
            .unwrap());
        // Issued after the cut → still valid
        assert!(!store
            .is_revoked("a.b.c", "user-1", Some(1_001))
            .await
            .unwrap());
        // Other subjects unaffected
        assert!(!store
            .is_revoked("a.b.c", "user-2", Some(900))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_iat_is_treated_as_oldest() {
        let store = store();
        store
            .revoke_subject("user-1", 0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.is_revoked("a.b.c", "user-1", None).await.unwrap());
    }
}
