//! Digest aggregation
//!
//! Recipients on a digest cadence accumulate pending entries in the shared
//! cache (so process memory stays bounded) until the scheduler tick flushes
//! them into one summary notification per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::model::{Notification, NotificationType, Priority};
use super::service::{created_routing_key, NotificationService};
use crate::error::Result;
use crate::producer::OutboundMessage;

const PENDING_PREFIX: &str = "notify:digest:pending:";
const PENDING_USERS_KEY: &str = "notify:digest:users";

/// Pending entries survive at most a week even if never flushed
const PENDING_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// One accumulated notification awaiting the digest flush
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEntry {
    pub notification_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

fn pending_key(user_id: &str) -> String {
    format!("{}{}", PENDING_PREFIX, user_id)
}

impl NotificationService {
    /// Record a notification as digest-pending instead of fanning out
    pub(crate) async fn enqueue_digest_pending(&self, notification: &Notification) -> Result<()> {
        let entry = DigestEntry {
            notification_id: notification.id,
            notification_type: notification.notification_type,
            title: notification.title.clone(),
            created_at: notification.created_at,
        };
        let encoded = serde_json::to_string(&entry)
            .map_err(|e| crate::error::Error::Internal(format!("Digest entry: {}", e)))?;

        self.cache
            .set_add(&pending_key(&notification.owner_id), &encoded, Some(PENDING_TTL))
            .await?;
        self.cache
            .set_add(PENDING_USERS_KEY, &notification.owner_id, Some(PENDING_TTL))
            .await?;

        tracing::debug!(
            id = %notification.id,
            user = %notification.owner_id,
            "Notification deferred to digest"
        );
        Ok(())
    }

    /// Flush every user's pending digest into a summary notification
    ///
    /// Returns the number of summaries produced.
    pub async fn flush_digests(&self) -> Result<usize> {
        let users = self.cache.set_members(PENDING_USERS_KEY).await?;
        let mut flushed = 0;

        for user_id in users {
            match self.flush_digest_for(&user_id).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    // One user's failure must not starve the others
                    tracing::error!(user = %user_id, "Digest flush failed: {}", e);
                }
            }
        }

        if flushed > 0 {
            tracing::info!(flushed, "Digest flush complete");
        }
        Ok(flushed)
    }

    async fn flush_digest_for(&self, user_id: &str) -> Result<bool> {
        let key = pending_key(user_id);
        let raw_entries = self.cache.set_members(&key).await?;
        if raw_entries.is_empty() {
            self.cache.set_remove(PENDING_USERS_KEY, user_id).await?;
            return Ok(false);
        }

        let mut entries: Vec<DigestEntry> = raw_entries
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let count = entries.len();
        let mut variables = HashMap::new();
        variables.insert("username".to_string(), user_id.to_string());
        variables.insert("count".to_string(), count.to_string());

        let rendered = self
            .templates
            .render(NotificationType::DigestSummary, None, &variables)
            .map(|p| (p.subject, p.body))
            .unwrap_or_else(|_| {
                (
                    "Your activity summary".to_string(),
                    format!("You have {} new notifications waiting.", count),
                )
            });

        let now = Utc::now();
        let summary = Notification {
            id: Uuid::new_v4(),
            owner_id: user_id.to_string(),
            notification_type: NotificationType::DigestSummary,
            title: rendered.0,
            content: rendered.1,
            action_url: None,
            priority: Priority::Normal,
            read: false,
            read_at: None,
            archived: false,
            data: HashMap::from([(
                "digestCount".to_string(),
                serde_json::Value::from(count),
            )]),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&summary).await?;

        let message = OutboundMessage::new(
            summary.id,
            created_routing_key(summary.priority),
            summary.priority.broker_priority(),
            self.producer.max_retries(),
            // The digest is its own causal chain
            crate::context::new_opaque_id(),
        );
        let body = json!({
            "summary": summary,
            "entries": entries,
        });
        self.producer.publish(message, &body).await?;

        // Only clear state after the summary is persisted and enqueued
        self.cache.delete(&key).await?;
        self.cache.set_remove(PENDING_USERS_KEY, user_id).await?;

        tracing::info!(user = %user_id, count, "Digest summary delivered");
        Ok(true)
    }
}

/// Run the digest flush on an interval until the service shuts down
pub fn spawn_digest_scheduler(
    service: Arc<NotificationService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.flush_digests().await {
                tracing::error!("Digest scheduler tick failed: {}", e);
            }
        }
    })
}
