//! Topic-keyed fan-out hub
//!
//! Subscribers receive frames over per-subscription FIFO channels. A
//! permission gate runs before every publish; a denial is delivered only
//! to the publisher, never to the topic. With a cache attached, publishes
//! travel through cache pub/sub so every node dispatches the same ordered
//! stream.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::frames::{Frame, Topic};
use crate::cache::Cache;
use crate::error::Result;

const SUBSCRIBER_BUFFER: usize = 64;

/// Decides whether a user may publish a frame to a topic
pub trait PermissionGate: Send + Sync {
    fn may_publish(&self, user_id: &str, topic: &Topic, frame: &Frame) -> bool;
}

/// Default gate: any authenticated user may publish
pub struct AllowAll;

impl PermissionGate for AllowAll {
    fn may_publish(&self, _: &str, _: &Topic, _: &Frame) -> bool {
        true
    }
}

/// Outcome of a publish attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Delivered to the topic
    Delivered,
    /// Denied; the frame goes back to the originating subscription only
    Denied(Frame),
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<Frame>,
}

/// An active subscription handle
pub struct Subscription {
    pub id: Uuid,
    pub topic: Topic,
    pub receiver: mpsc::Receiver<Frame>,
}

/// The broadcast hub
pub struct BroadcastHub {
    gate: Arc<dyn PermissionGate>,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    cache: Option<Arc<dyn Cache>>,
    bridged: DashMap<String, ()>,
}

impl BroadcastHub {
    pub fn new(gate: Arc<dyn PermissionGate>) -> Self {
        Self {
            gate,
            subscribers: Arc::new(DashMap::new()),
            cache: None,
            bridged: DashMap::new(),
        }
    }

    /// Bridge publishes through cache pub/sub for cross-node fan-out
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Subscribe to a topic; frames arrive in publish order
    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        let name = topic.name();

        self.subscribers
            .entry(name.clone())
            .or_default()
            .push(Subscriber { id, sender });

        self.ensure_bridge(&name).await?;

        tracing::debug!(topic = %name, subscription = %id, "Subscription registered");
        Ok(Subscription {
            id,
            topic,
            receiver,
        })
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, topic: &Topic, id: Uuid) {
        if let Some(mut entry) = self.subscribers.get_mut(&topic.name()) {
            entry.retain(|s| s.id != id);
        }
    }

    /// Publish a frame; the permission check precedes everything
    pub async fn publish(
        &self,
        user_id: &str,
        topic: &Topic,
        frame: Frame,
    ) -> Result<PublishOutcome> {
        if !self.gate.may_publish(user_id, topic, &frame) {
            tracing::debug!(
                user = %user_id,
                topic = %topic,
                action = frame.action(),
                "Publish denied"
            );
            return Ok(PublishOutcome::Denied(Frame::PermissionDenied {
                action: frame.action().to_string(),
                reason: format!("User {} may not publish to {}", user_id, topic),
            }));
        }

        match &self.cache {
            Some(cache) => {
                // Cross-node path: the bridge task dispatches locally, so
                // ordering comes from the cache's per-topic stream.
                let payload = serde_json::to_string(&frame).map_err(|e| {
                    crate::error::Error::Internal(format!("Frame serialization: {}", e))
                })?;
                cache.publish(&topic.name(), &payload).await?;
            }
            None => {
                self.dispatch(&topic.name(), frame).await;
            }
        }

        Ok(PublishOutcome::Delivered)
    }

    /// Fan a frame out to every local subscriber of a topic
    async fn dispatch(&self, topic_name: &str, frame: Frame) {
        // Snapshot the senders so the map lock is not held across await
        let senders: Vec<(Uuid, mpsc::Sender<Frame>)> = match self.subscribers.get(topic_name) {
            Some(entry) => entry
                .iter()
                .map(|s| (s.id, s.sender.clone()))
                .collect(),
            None => return,
        };

        let mut dead = Vec::new();
        for (id, sender) in senders {
            if sender.send(frame.clone()).await.is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            if let Some(mut entry) = self.subscribers.get_mut(topic_name) {
                entry.retain(|s| !dead.contains(&s.id));
            }
        }
    }

    /// Start the cache bridge for a topic exactly once
    async fn ensure_bridge(&self, topic_name: &str) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        if self.bridged.contains_key(topic_name) {
            return Ok(());
        }

        let mut stream = cache.subscribe(topic_name).await?;
        self.bridged.insert(topic_name.to_string(), ());

        let subscribers = self.subscribers.clone();
        let name = topic_name.to_string();
        tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                let frame: Frame = match serde_json::from_str(&payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(topic = %name, "Dropping unreadable frame: {}", e);
                        continue;
                    }
                };

                let senders: Vec<mpsc::Sender<Frame>> = match subscribers.get(&name) {
                    Some(entry) => entry.iter().map(|s| s.sender.clone()).collect(),
                    None => continue,
                };
                for sender in senders {
                    let _ = sender.send(frame.clone()).await;
                }
            }
            tracing::debug!(topic = %name, "Cache bridge closed");
        });

        Ok(())
    }
}
