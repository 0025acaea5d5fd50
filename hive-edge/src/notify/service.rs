//! Notification intake, classification, and fan-out

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::model::{
    validate_request, Channel, Notification, NotificationRequest, Page, Priority,
};
use super::store::NotificationStore;
use crate::cache::Cache;
use crate::config::NotificationConfig;
use crate::error::{Error, Result};
use crate::producer::{OutboundMessage, OutboundProducer};
use crate::templates::TemplateStore;

pub(crate) const PREFS_PREFIX: &str = "notify:prefs:";

/// Routing keys for the in-app persist event
const CREATED_KEY: &str = "notification.created";
const PRIORITY_HIGH_KEY: &str = "notification.priority.high";

/// How a recipient wants deliveries batched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestCadence {
    #[default]
    Immediate,
    Hourly,
    Daily,
}

/// Per-recipient delivery preferences, read through the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub digest: DigestCadence,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            channels: vec![Channel::InApp],
            digest: DigestCadence::Immediate,
        }
    }
}

/// The notification delivery core
pub struct NotificationService {
    pub(crate) store: Arc<dyn NotificationStore>,
    pub(crate) templates: Arc<TemplateStore>,
    pub(crate) producer: Arc<OutboundProducer>,
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        templates: Arc<TemplateStore>,
        producer: Arc<OutboundProducer>,
        cache: Arc<dyn Cache>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            store,
            templates,
            producer,
            cache,
            config,
        }
    }

    /// Recipient preferences; absent or unreadable entries use the default
    pub async fn preferences(&self, user_id: &str) -> Preferences {
        let key = format!("{}{}", PREFS_PREFIX, user_id);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Preferences::default(),
            Err(e) => {
                tracing::warn!(user = %user_id, "Preference lookup failed, using defaults: {}", e);
                Preferences::default()
            }
        }
    }

    /// Intake: validate, persist, classify, render, enqueue
    pub async fn create(
        &self,
        request: NotificationRequest,
        correlation_id: &str,
    ) -> Result<Notification> {
        validate_request(&request, &self.config)?;

        let preferences = self.preferences(&request.recipient_id).await;
        let notification = Notification::from_request(&request);
        self.store.insert(&notification).await?;

        tracing::info!(
            id = %notification.id,
            recipient = %request.recipient_id,
            r#type = %request.notification_type,
            "Notification persisted"
        );

        // Digest-cadence recipients accumulate instead of fanning out;
        // high-priority traffic always delivers immediately.
        if preferences.digest != DigestCadence::Immediate && request.priority < Priority::High {
            self.enqueue_digest_pending(&notification).await?;
            return Ok(notification);
        }

        let channels = resolve_channels(&request, &preferences);
        for channel in channels {
            let (routing_key, body) = self.channel_message(&notification, &request, channel);
            let message = OutboundMessage::new(
                notification.id,
                routing_key,
                request.priority.broker_priority(),
                self.producer.max_retries(),
                correlation_id,
            );
            if !self.producer.publish(message, &body).await? {
                tracing::warn!(
                    id = %notification.id,
                    channel = ?channel,
                    "Channel delivery dead-lettered"
                );
            }
        }

        Ok(notification)
    }

    /// Routing key and payload for one delivery channel
    fn channel_message(
        &self,
        notification: &Notification,
        request: &NotificationRequest,
        channel: Channel,
    ) -> (String, serde_json::Value) {
        match channel {
            Channel::InApp => (
                created_routing_key(request.priority).to_string(),
                json!(notification),
            ),
            Channel::Email | Channel::Push => {
                let rendered = self.render_for_channel(request);
                let key = format!("notification.{}.send", channel.routing_segment());
                let mut body = json!({
                    "notificationId": notification.id,
                    "recipientId": notification.owner_id,
                    "subject": rendered.0,
                    "content": rendered.1,
                    "priority": request.priority,
                });
                if channel == Channel::Email {
                    if let Some(email) = request.user_email() {
                        body["email"] = json!(email);
                    }
                }
                (key, body)
            }
        }
    }

    /// Render channel content, falling back to the raw title/content when
    /// the template cannot be rendered
    fn render_for_channel(&self, request: &NotificationRequest) -> (String, String) {
        let variables = request.variables.clone().unwrap_or_default();
        match self.templates.render(
            request.notification_type,
            request.language.as_deref(),
            &variables,
        ) {
            Ok(processed) => (processed.subject, processed.body),
            Err(e) => {
                tracing::warn!(
                    r#type = %request.notification_type,
                    "Channel template unavailable, using request content: {}",
                    Error::from(e)
                );
                (request.title.clone(), request.content.clone())
            }
        }
    }

    /// Load a record the principal owns, per the write-path contract:
    /// unknown ids and ownership mismatches are both 400
    async fn owned(&self, raw_id: &str, owner_id: &str) -> Result<Notification> {
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| Error::Validation("Invalid notification id".to_string()))?;
        let notification = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::Validation("Notification not found".to_string()))?;

        if notification.owner_id != owner_id {
            return Err(Error::Validation(
                "Notification does not belong to the requesting user".to_string(),
            ));
        }

        Ok(notification)
    }

    /// Mark a notification read; `read_at` is set on the first transition
    pub async fn mark_read(&self, raw_id: &str, owner_id: &str) -> Result<Notification> {
        let mut notification = self.owned(raw_id, owner_id).await?;
        if !notification.read {
            notification.read = true;
            notification.read_at = Some(chrono::Utc::now());
            notification.updated_at = chrono::Utc::now();
            self.store.update(&notification).await?;
        }
        Ok(notification)
    }

    /// Archive a notification
    pub async fn archive(&self, raw_id: &str, owner_id: &str) -> Result<Notification> {
        let mut notification = self.owned(raw_id, owner_id).await?;
        if !notification.archived {
            notification.archived = true;
            notification.updated_at = chrono::Utc::now();
            self.store.update(&notification).await?;
        }
        Ok(notification)
    }

    /// Delete a notification
    pub async fn delete(&self, raw_id: &str, owner_id: &str) -> Result<()> {
        let notification = self.owned(raw_id, owner_id).await?;
        self.store.delete(&notification).await
    }

    /// Paginated listing, newest first
    pub async fn list(&self, owner_id: &str, page: usize, size: usize) -> Result<Page<Notification>> {
        let size = size.clamp(1, self.config.page_size_cap);
        let all = self.store.list_for_owner(owner_id).await?;
        let total = all.len();
        let items = all
            .into_iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .collect();
        Ok(Page {
            items,
            page,
            size,
            total,
        })
    }

    /// Unread, unarchived notifications
    pub async fn unread(&self, owner_id: &str) -> Result<Vec<Notification>> {
        let mut all = self.store.list_for_owner(owner_id).await?;
        all.retain(|n| !n.read && !n.archived);
        Ok(all)
    }

    pub async fn unread_count(&self, owner_id: &str) -> Result<usize> {
        Ok(self.unread(owner_id).await?.len())
    }
}

/// The in-app persist event key; high priority uses the priority channel
pub(crate) fn created_routing_key(priority: Priority) -> &'static str {
    if priority >= Priority::High {
        PRIORITY_HIGH_KEY
    } else {
        CREATED_KEY
    }
}

/// Channels for a request: preferences + type + metadata hints
fn resolve_channels(request: &NotificationRequest, preferences: &Preferences) -> Vec<Channel> {
    let mut channels = vec![Channel::InApp];

    for channel in &preferences.channels {
        if !channels.contains(channel) {
            channels.push(*channel);
        }
    }

    // A userEmail metadata hint promotes the email channel
    if request.user_email().is_some() && !channels.contains(&Channel::Email) {
        channels.push(Channel::Email);
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::ProducerConfig;
    use crate::notify::model::NotificationType;
    use crate::notify::store::CacheNotificationStore;
    use crate::producer::testing::RecordingTransport;
    use crate::producer::{HEADER_CORRELATION_ID, HEADER_PRIORITY};
    use std::collections::HashMap;
    use std::time::Duration;

    fn service() -> (NotificationService, Arc<RecordingTransport>, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let transport = Arc::new(RecordingTransport::new(0));
        let service = NotificationService::new(
            Arc::new(CacheNotificationStore::new(
                cache.clone(),
                Duration::from_secs(3600),
            )),
            Arc::new(TemplateStore::with_defaults("en")),
            Arc::new(OutboundProducer::new(
                transport.clone(),
                ProducerConfig::default(),
            )),
            cache.clone(),
            NotificationConfig::default(),
        );
        (service, transport, cache)
    }

    fn request(recipient: &str) -> NotificationRequest {
        NotificationRequest {
            recipient_id: recipient.to_string(),
            notification_type: NotificationType::ForumReply,
            title: "New reply".to_string(),
            content: "Someone replied to your thread".to_string(),
            priority: Priority::Normal,
            language: None,
            variables: None,
            action_url: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_persists_and_enqueues_created_event() {
        let (service, transport, _) = service();

        let notification = service.create(request("user-1"), "corr-1").await.unwrap();
        assert!(!notification.read);
        assert!(!notification.archived);

        let records = transport.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "notification.created");
        assert_eq!(records[0].header(HEADER_CORRELATION_ID), Some("corr-1"));

        let body: serde_json::Value = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(body["id"], json!(notification.id));
        assert_eq!(body["ownerId"], "user-1");
    }

    #[tokio::test]
    async fn test_email_hint_fans_out_to_two_messages() {
        let (service, transport, _) = service();

        let mut req = request("user-1");
        req.notification_type = NotificationType::PasswordReset;
        req.metadata.insert(
            "userEmail".to_string(),
            serde_json::Value::String("u@example.com".to_string()),
        );

        service.create(req, "corr-6").await.unwrap();

        let records = transport.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subject, "notification.created");
        assert_eq!(records[1].subject, "notification.email.send");
        // Both legs share the correlation id
        assert_eq!(records[0].header(HEADER_CORRELATION_ID), Some("corr-6"));
        assert_eq!(records[1].header(HEADER_CORRELATION_ID), Some("corr-6"));

        let email_body: serde_json::Value = serde_json::from_slice(&records[1].payload).unwrap();
        assert_eq!(email_body["email"], "u@example.com");
    }

    #[tokio::test]
    async fn test_high_priority_uses_priority_routing_key() {
        let (service, transport, _) = service();

        let mut req = request("user-1");
        req.priority = Priority::Urgent;
        service.create(req, "corr-1").await.unwrap();

        let records = transport.records();
        assert_eq!(records[0].subject, "notification.priority.high");
        assert_eq!(records[0].header(HEADER_PRIORITY), Some("9"));
    }

    #[tokio::test]
    async fn test_invalid_request_persists_nothing() {
        let (service, transport, _) = service();

        let mut req = request("user-1");
        req.title = "<script>x</script>".to_string();
        let result = service.create(req, "corr-1").await;
        assert!(matches!(result, Err(Error::Validation(_))));

        assert!(transport.records().is_empty());
        assert!(service.list("user-1", 0, 20).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_ownership_mismatch_is_400_with_stable_message() {
        let (service, _, _) = service();

        let notification = service.create(request("user-1"), "c").await.unwrap();
        let result = service
            .mark_read(&notification.id.to_string(), "user-2")
            .await;

        match result {
            Err(Error::Validation(message)) => {
                assert_eq!(message, "Notification does not belong to the requesting user");
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_400() {
        let (service, _, _) = service();
        assert!(matches!(
            service.mark_read("not-a-uuid", "user-1").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            service
                .mark_read(&Uuid::new_v4().to_string(), "user-1")
                .await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_sets_read_at_once() {
        let (service, _, _) = service();
        let n = service.create(request("user-1"), "c").await.unwrap();

        let read = service.mark_read(&n.id.to_string(), "user-1").await.unwrap();
        assert!(read.read);
        let first_read_at = read.read_at.unwrap();

        // A second read does not move the timestamp
        let again = service.mark_read(&n.id.to_string(), "user-1").await.unwrap();
        assert_eq!(again.read_at.unwrap(), first_read_at);
    }

    #[tokio::test]
    async fn test_archive_and_delete() {
        let (service, _, _) = service();
        let n = service.create(request("user-1"), "c").await.unwrap();

        let archived = service.archive(&n.id.to_string(), "user-1").await.unwrap();
        assert!(archived.archived);

        service.delete(&n.id.to_string(), "user-1").await.unwrap();
        assert!(matches!(
            service.mark_read(&n.id.to_string(), "user-1").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_pagination_and_unread_counts() {
        let (service, _, _) = service();

        for i in 0..5 {
            let mut req = request("user-1");
            req.title = format!("n{}", i);
            service.create(req, "c").await.unwrap();
        }

        let page = service.list("user-1", 0, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);

        let page = service.list("user-1", 2, 2).await.unwrap();
        assert_eq!(page.items.len(), 1);

        assert_eq!(service.unread_count("user-1").await.unwrap(), 5);

        // Reading one reduces the unread count
        let first = service.list("user-1", 0, 1).await.unwrap().items[0].clone();
        service
            .mark_read(&first.id.to_string(), "user-1")
            .await
            .unwrap();
        assert_eq!(service.unread_count("user-1").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_preference_channels_extend_fanout() {
        let (service, transport, cache) = service();

        cache
            .set(
                "notify:prefs:user-1",
                &serde_json::to_string(&Preferences {
                    channels: vec![Channel::InApp, Channel::Push],
                    digest: DigestCadence::Immediate,
                })
                .unwrap(),
                None,
            )
            .await
            .unwrap();

        service.create(request("user-1"), "c").await.unwrap();

        let subjects: Vec<String> = transport
            .records()
            .into_iter()
            .map(|r| r.subject)
            .collect();
        assert_eq!(
            subjects,
            vec![
                "notification.created".to_string(),
                "notification.push.send".to_string()
            ]
        );
    }

    #[test]
    fn test_created_routing_key_by_priority() {
        assert_eq!(created_routing_key(Priority::Low), "notification.created");
        assert_eq!(created_routing_key(Priority::Normal), "notification.created");
        assert_eq!(
            created_routing_key(Priority::High),
            "notification.priority.high"
        );
        assert_eq!(
            created_routing_key(Priority::Urgent),
            "notification.priority.high"
        );
    }

    #[test]
    fn test_resolve_channels_dedupes() {
        let mut req = request("u");
        req.metadata.insert(
            "userEmail".to_string(),
            serde_json::Value::String("u@example.com".to_string()),
        );
        let prefs = Preferences {
            channels: vec![Channel::InApp, Channel::Email],
            digest: DigestCadence::Immediate,
        };
        let channels = resolve_channels(&req, &prefs);
        assert_eq!(channels, vec![Channel::InApp, Channel::Email]);
    }
}
