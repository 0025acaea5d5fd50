//! Notification persistence seam
//!
//! Durable business storage is an external collaborator; this trait is the
//! contract the core consumes. The shipped implementation keeps records in
//! the shared cache (JSON values plus a per-owner index set), which also
//! serves the in-memory cache in tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::model::Notification;
use crate::cache::Cache;
use crate::error::Result;

const RECORD_PREFIX: &str = "notify:record:";
const OWNER_INDEX_PREFIX: &str = "notify:user:";

/// Persistence surface for notification records
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;

    /// Replace an existing record; the id never changes
    async fn update(&self, notification: &Notification) -> Result<()>;

    async fn delete(&self, notification: &Notification) -> Result<()>;

    /// All records of one owner, newest first
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Notification>>;
}

/// Cache-backed store implementation
pub struct CacheNotificationStore {
    cache: Arc<dyn Cache>,
    record_ttl: Duration,
}

impl CacheNotificationStore {
    pub fn new(cache: Arc<dyn Cache>, record_ttl: Duration) -> Self {
        Self { cache, record_ttl }
    }

    fn record_key(id: Uuid) -> String {
        format!("{}{}", RECORD_PREFIX, id)
    }

    fn owner_key(owner_id: &str) -> String {
        format!("{}{}", OWNER_INDEX_PREFIX, owner_id)
    }

    fn encode(notification: &Notification) -> Result<String> {
        serde_json::to_string(notification)
            .map_err(|e| crate::error::Error::Internal(format!("Record serialization: {}", e)))
    }
}

#[async_trait]
impl NotificationStore for CacheNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        self.cache
            .set(
                &Self::record_key(notification.id),
                &Self::encode(notification)?,
                Some(self.record_ttl),
            )
            .await?;
        self.cache
            .set_add(
                &Self::owner_key(&notification.owner_id),
                &notification.id.to_string(),
                Some(self.record_ttl),
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let raw = self.cache.get(&Self::record_key(id)).await?;
        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(notification) => Ok(Some(notification)),
                Err(e) => {
                    tracing::warn!(id = %id, "Dropping unreadable notification record: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn update(&self, notification: &Notification) -> Result<()> {
        self.cache
            .set(
                &Self::record_key(notification.id),
                &Self::encode(notification)?,
                Some(self.record_ttl),
            )
            .await
    }

    async fn delete(&self, notification: &Notification) -> Result<()> {
        self.cache.delete(&Self::record_key(notification.id)).await?;
        self.cache
            .set_remove(
                &Self::owner_key(&notification.owner_id),
                &notification.id.to_string(),
            )
            .await?;
        Ok(())
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<Notification>> {
        let ids = self.cache.set_members(&Self::owner_key(owner_id)).await?;

        let mut notifications = Vec::with_capacity(ids.len());
        for raw_id in ids {
            let Ok(id) = raw_id.parse::<Uuid>() else {
                continue;
            };
            match self.get(id).await? {
                Some(notification) => notifications.push(notification),
                None => {
                    // The record expired; prune the index entry
                    self.cache
                        .set_remove(&Self::owner_key(owner_id), &raw_id)
                        .await?;
                }
            }
        }

        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::notify::model::{NotificationRequest, NotificationType, Priority};
    use std::collections::HashMap;

    fn store() -> CacheNotificationStore {
        CacheNotificationStore::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600))
    }

    fn notification(owner: &str, title: &str) -> Notification {
        Notification::from_request(&NotificationRequest {
            recipient_id: owner.to_string(),
            notification_type: NotificationType::ForumReply,
            title: title.to_string(),
            content: "body".to_string(),
            priority: Priority::Normal,
            language: None,
            variables: None,
            action_url: None,
            metadata: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let store = store();
        let n = notification("user-1", "hello");
        store.insert(&n).await.unwrap();

        let loaded = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, n.id);
        assert_eq!(loaded.owner_id, "user-1");
        assert_eq!(loaded.title, "hello");
        assert!(!loaded.read);
    }

    #[tokio::test]
    async fn test_update_preserves_id() {
        let store = store();
        let mut n = notification("user-1", "hello");
        store.insert(&n).await.unwrap();

        n.read = true;
        store.update(&n).await.unwrap();

        let loaded = store.get(n.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, n.id);
        assert!(loaded.read);
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_index() {
        let store = store();
        let n = notification("user-1", "bye");
        store.insert(&n).await.unwrap();
        store.delete(&n).await.unwrap();

        assert!(store.get(n.id).await.unwrap().is_none());
        assert!(store.list_for_owner("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_newest_first_per_owner() {
        let store = store();
        let a = notification("user-1", "first");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = notification("user-1", "second");
        let other = notification("user-2", "not yours");

        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store.insert(&other).await.unwrap();

        let list = store.list_for_owner("user-1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "second");
        assert_eq!(list[1].title, "first");
    }
}
