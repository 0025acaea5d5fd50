//! Shared cache abstraction
//!
//! The single dependency surface for the rate-limit engine, the revocation
//! set, the notification core, and real-time fan-out: key-value with TTL,
//! atomic counters, compare-and-set, set operations, and pub/sub.
//!
//! Counters rely on [`Cache::increment`] and [`Cache::compare_and_set`]
//! only; there is no read-modify-write path without a compare-exchange.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

mod memory;
mod redis;

pub use self::memory::MemoryCache;
pub use self::redis::{create_pool, RedisCache};

/// Minimal cache contract consumed across the edge plane
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increment a counter, returning the new value
    ///
    /// When `ttl_on_create` is given, the TTL is applied only on the
    /// increment that created the key.
    async fn increment(&self, key: &str, ttl_on_create: Option<Duration>) -> Result<i64>;

    /// Atomically replace `expected` with `new`
    ///
    /// `expected = None` succeeds only when the key is absent. Returns
    /// whether the swap happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Add a member to a set, optionally refreshing the set TTL
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a member from a set
    async fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Cardinality of a set
    async fn set_size(&self, key: &str) -> Result<u64>;

    /// Best-effort deletion of keys matching a glob pattern
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Subscribe to a topic; messages arrive in publish order
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn Cache) {}
    }
}
