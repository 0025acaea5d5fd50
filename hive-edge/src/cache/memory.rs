//! In-process cache implementation
//!
//! Backs unit tests and nothing else in the default deployment; the
//! fail-open rate-limit fallback uses governor directly rather than this
//! map. Expiry is evaluated lazily on access.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::Cache;
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
struct SetEntry {
    members: HashSet<String>,
    expires_at: Option<Instant>,
}

impl SetEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| Instant::now() < t).unwrap_or(true)
    }
}

/// Cache implementation over process-local maps
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    sets: DashMap<String, SetEntry>,
    topics: DashMap<String, Vec<mpsc::Sender<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl: Option<Duration>) -> Option<Instant> {
        ttl.map(|t| Instant::now() + t)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.entries.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Self::deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        self.sets.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_on_create: Option<Duration>) -> Result<i64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: Self::deadline(ttl_on_create),
        });

        // An expired counter restarts its window
        if !entry.live() {
            entry.value = "0".to_string();
            entry.expires_at = Self::deadline(ttl_on_create);
        }

        let current: i64 = entry.value.parse().unwrap_or(0);
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let live = occupied.get().live();
                let matches = match expected {
                    Some(expected) => live && occupied.get().value == expected,
                    None => !live,
                };
                if matches {
                    occupied.insert(Entry {
                        value: new.to_string(),
                        expires_at: Self::deadline(ttl),
                    });
                    Ok(true)
                } else if !live && expected.is_some() {
                    occupied.remove();
                    Ok(false)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(Entry {
                        value: new.to_string(),
                        expires_at: Self::deadline(ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entry = self.sets.entry(key.to_string()).or_insert_with(|| SetEntry {
            members: HashSet::new(),
            expires_at: None,
        });
        if !entry.live() {
            entry.members.clear();
        }
        entry.members.insert(member.to_string());
        if ttl.is_some() {
            entry.expires_at = Self::deadline(ttl);
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut entry) = self.sets.get_mut(key) {
            entry.members.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        match self.sets.get(key) {
            Some(entry) if entry.live() => Ok(entry.members.iter().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn set_size(&self, key: &str) -> Result<u64> {
        match self.sets.get(key) {
            Some(entry) if entry.live() => Ok(entry.members.len() as u64),
            _ => Ok(0),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut deleted = 0;
        let matching: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .chain(self.sets.iter().map(|e| e.key().clone()))
            .filter(|k| glob_match(pattern, k))
            .collect();
        for key in matching {
            if self.entries.remove(&key).is_some() {
                deleted += 1;
            }
            if self.sets.remove(&key).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        if let Some(mut senders) = self.topics.get_mut(topic) {
            senders.retain(|tx| tx.try_send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(64);
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

/// Redis-style glob: `*` matches any run of characters
fn glob_match(pattern: &str, key: &str) -> bool {
    fn inner(p: &[u8], k: &[u8]) -> bool {
        match (p.first(), k.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], k) || (!k.is_empty() && inner(p, &k[1..]))
            }
            (Some(pc), Some(kc)) if pc == kc => inner(&p[1..], &k[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_sets_ttl_on_create_only() {
        let cache = MemoryCache::new();
        assert_eq!(
            cache
                .increment("c", Some(Duration::from_secs(60)))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            cache
                .increment("c", Some(Duration::from_secs(60)))
                .await
                .unwrap(),
            2
        );
        assert_eq!(cache.increment("c", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let cache = MemoryCache::new();

        // Create-if-absent
        assert!(cache.compare_and_set("k", None, "a", None).await.unwrap());
        assert!(!cache.compare_and_set("k", None, "b", None).await.unwrap());

        // Swap on match
        assert!(cache
            .compare_and_set("k", Some("a"), "b", None)
            .await
            .unwrap());
        assert!(!cache
            .compare_and_set("k", Some("a"), "c", None)
            .await
            .unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let cache = MemoryCache::new();
        cache.set_add("s", "a", None).await.unwrap();
        cache.set_add("s", "b", None).await.unwrap();
        cache.set_add("s", "a", None).await.unwrap();

        assert_eq!(cache.set_size("s").await.unwrap(), 2);

        cache.set_remove("s", "a").await.unwrap();
        assert_eq!(cache.set_members("s").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = MemoryCache::new();
        cache.set("ratelimit:user:1", "5", None).await.unwrap();
        cache.set("ratelimit:user:2", "7", None).await.unwrap();
        cache.set("other:1", "x", None).await.unwrap();

        let deleted = cache.delete_pattern("ratelimit:*").await.unwrap();
        assert_eq!(deleted, 2);
        assert!(cache.get("other:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pubsub_order() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe("topic").await.unwrap();

        for i in 0..5 {
            cache.publish("topic", &i.to_string()).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), i.to_string());
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("ratelimit:*", "ratelimit:user:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(!glob_match("ratelimit:*", "auth:revoked:1"));
    }
}
