//! Outbound message production with retry and dead-letter semantics
//!
//! The producer drives a [`BrokerTransport`]: on publish error it
//! republishes the same message (same id) while `retry_count <
//! max_retries`, then routes to the dead-letter subject with the failure
//! headers. Success means the broker acknowledged receipt, not delivery.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ProducerConfig;
use crate::error::Result;

pub mod nats;

pub use nats::{create_client, JetStreamTransport};

/// Message headers
pub const HEADER_MESSAGE_ID: &str = "x-message-id";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_RETRY_COUNT: &str = "x-retry-count";
pub const HEADER_PRIORITY: &str = "x-priority";
pub const HEADER_FAILURE_REASON: &str = "x-failure-reason";
pub const HEADER_ORIGINAL_QUEUE: &str = "x-original-queue";
pub const HEADER_FAILED_AT: &str = "x-failed-at";

/// A message bound for the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Stable identity across retries, so consumers can deduplicate
    pub id: Uuid,

    /// The notification this message delivers
    pub notification_id: Uuid,

    /// Destination routing key (e.g. `notification.email.send`)
    pub routing_key: String,

    /// Broker priority 0-9
    pub priority: u8,

    pub retry_count: u32,
    pub max_retries: u32,

    pub correlation_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl OutboundMessage {
    pub fn new(
        notification_id: Uuid,
        routing_key: impl Into<String>,
        priority: u8,
        max_retries: u32,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            routing_key: routing_key.into(),
            priority: priority.min(9),
            retry_count: 0,
            max_retries,
            correlation_id: correlation_id.into(),
            failure_reason: None,
        }
    }
}

/// Minimal broker publish surface
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        headers: &[(String, String)],
        payload: &[u8],
    ) -> Result<()>;
}

/// Retry/DLQ driver over a broker transport
pub struct OutboundProducer {
    transport: Arc<dyn BrokerTransport>,
    config: ProducerConfig,
}

impl OutboundProducer {
    pub fn new(transport: Arc<dyn BrokerTransport>, config: ProducerConfig) -> Self {
        Self { transport, config }
    }

    /// Default retry budget for messages built by callers
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Publish one message; `Ok(true)` is a broker ack, `Ok(false)` means
    /// the message was dead-lettered after exhausting its retries
    pub async fn publish(&self, message: OutboundMessage, body: &Value) -> Result<bool> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| crate::error::Error::Internal(format!("Payload serialization: {}", e)))?;
        let subject = self.subject_for(&message.routing_key);
        let mut message = message;

        loop {
            let headers = self.publish_headers(&message);
            match self.transport.publish(&subject, &headers, &payload).await {
                Ok(()) => {
                    tracing::debug!(
                        message_id = %message.id,
                        subject = %subject,
                        retry_count = message.retry_count,
                        "Broker acknowledged message"
                    );
                    return Ok(true);
                }
                Err(e) if message.retry_count < message.max_retries => {
                    message.retry_count += 1;
                    tracing::warn!(
                        message_id = %message.id,
                        subject = %subject,
                        retry_count = message.retry_count,
                        max_retries = message.max_retries,
                        "Publish failed; republishing with same id: {}",
                        e
                    );
                }
                Err(e) => {
                    message.failure_reason = Some(e.to_string());
                    self.dead_letter(&message, &subject, &payload).await?;
                    return Ok(false);
                }
            }
        }
    }

    /// Best-effort batch publish; each item runs the full retry/DLQ path
    pub async fn publish_batch(&self, items: Vec<(OutboundMessage, Value)>) -> Vec<bool> {
        let mut outcomes = Vec::with_capacity(items.len());
        for (message, body) in items {
            let message_id = message.id;
            match self.publish(message, &body).await {
                Ok(acked) => outcomes.push(acked),
                Err(e) => {
                    tracing::error!(message_id = %message_id, "Batch item failed terminally: {}", e);
                    outcomes.push(false);
                }
            }
        }
        outcomes
    }

    async fn dead_letter(
        &self,
        message: &OutboundMessage,
        original_subject: &str,
        payload: &[u8],
    ) -> Result<()> {
        let dlx_subject = format!("{}.{}", self.config.dlx_prefix, original_subject);
        let mut headers = self.publish_headers(message);
        headers.push((
            HEADER_FAILURE_REASON.to_string(),
            message
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        ));
        headers.push((
            HEADER_ORIGINAL_QUEUE.to_string(),
            original_subject.to_string(),
        ));
        headers.push((HEADER_FAILED_AT.to_string(), Utc::now().to_rfc3339()));

        self.transport
            .publish(&dlx_subject, &headers, payload)
            .await?;

        tracing::error!(
            message_id = %message.id,
            subject = %original_subject,
            dlx = %dlx_subject,
            retry_count = message.retry_count,
            "Message dead-lettered"
        );
        Ok(())
    }

    fn publish_headers(&self, message: &OutboundMessage) -> Vec<(String, String)> {
        vec![
            (HEADER_MESSAGE_ID.to_string(), message.id.to_string()),
            (
                HEADER_CORRELATION_ID.to_string(),
                message.correlation_id.clone(),
            ),
            (
                HEADER_RETRY_COUNT.to_string(),
                message.retry_count.to_string(),
            ),
            (HEADER_PRIORITY.to_string(), message.priority.to_string()),
        ]
    }

    /// Routing keys live under the configured subject namespace
    fn subject_for(&self, routing_key: &str) -> String {
        if routing_key.starts_with(&self.config.subject_prefix) {
            routing_key.to_string()
        } else {
            format!("{}.{}", self.config.subject_prefix, routing_key)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    fn producer(fail_times: u32) -> (OutboundProducer, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new(fail_times));
        let producer = OutboundProducer::new(transport.clone(), ProducerConfig::default());
        (producer, transport)
    }

    fn message(max_retries: u32) -> OutboundMessage {
        OutboundMessage::new(
            Uuid::new_v4(),
            "notification.email.send",
            7,
            max_retries,
            "corr-42",
        )
    }

    #[tokio::test]
    async fn test_successful_publish_carries_headers() {
        let (producer, transport) = producer(0);
        let msg = message(3);
        let id = msg.id;

        let acked = producer
            .publish(msg, &serde_json::json!({"hello": "world"}))
            .await
            .unwrap();
        assert!(acked);

        let records = transport.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, "notification.email.send");
        assert_eq!(records[0].header(HEADER_CORRELATION_ID), Some("corr-42"));
        assert_eq!(records[0].header(HEADER_RETRY_COUNT), Some("0"));
        assert_eq!(records[0].header(HEADER_PRIORITY), Some("7"));
        assert_eq!(
            records[0].header(HEADER_MESSAGE_ID),
            Some(id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_retry_preserves_message_identity() {
        let (producer, transport) = producer(1);
        let msg = message(3);
        let id = msg.id;

        let acked = producer.publish(msg, &serde_json::json!({})).await.unwrap();
        assert!(acked);

        // One failed attempt is invisible to the record; the successful
        // retry carries the same id with the bumped count
        let records = transport.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header(HEADER_RETRY_COUNT), Some("1"));
        assert_eq!(
            records[0].header(HEADER_MESSAGE_ID),
            Some(id.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted_goes_to_dlx() {
        // Broker fails 3 times, max_retries = 2: attempts at counts 0, 1, 2
        // all fail, then exactly one DLX entry is written
        let (producer, transport) = producer(3);

        let acked = producer
            .publish(message(2), &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert!(!acked);

        let records = transport.records();
        assert_eq!(records.len(), 1);
        let dlx = &records[0];
        assert_eq!(dlx.subject, "notification.dlx.notification.email.send");
        assert_eq!(dlx.header(HEADER_RETRY_COUNT), Some("2"));
        assert_eq!(
            dlx.header(HEADER_ORIGINAL_QUEUE),
            Some("notification.email.send")
        );
        assert!(dlx.header(HEADER_FAILURE_REASON).is_some());
        assert!(dlx.header(HEADER_FAILED_AT).is_some());
        // The body travels with the dead letter
        assert_eq!(dlx.payload, serde_json::to_vec(&serde_json::json!({"n": 1})).unwrap());
    }

    #[tokio::test]
    async fn test_ack_xor_dead_letter() {
        // Whatever the failure pattern, each message ends as exactly one
        // ack or one DLX entry
        for fail_times in 0..6 {
            let (producer, transport) = producer(fail_times);
            let acked = producer
                .publish(message(2), &serde_json::json!({}))
                .await
                .unwrap();

            let records = transport.records();
            assert_eq!(records.len(), 1);
            let is_dlx = records[0].subject.starts_with("notification.dlx.");
            assert_eq!(acked, !is_dlx, "fail_times={}", fail_times);
        }
    }

    #[tokio::test]
    async fn test_batch_is_best_effort_per_item() {
        let (producer, transport) = producer(3);

        let outcomes = producer
            .publish_batch(vec![
                (message(0), serde_json::json!({"first": true})),
                (message(2), serde_json::json!({"second": true})),
            ])
            .await;

        // First item fails immediately (no retries) and dead-letters; the
        // failure budget is then spent, so the second item acks
        assert_eq!(outcomes, vec![false, true]);
        let records = transport.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].subject.starts_with("notification.dlx."));
        assert_eq!(records[1].subject, "notification.email.send");
    }

    #[tokio::test]
    async fn test_subject_prefixing() {
        let (producer, transport) = producer(0);
        let mut msg = message(0);
        msg.routing_key = "digest.pending".to_string();

        producer.publish(msg, &serde_json::json!({})).await.unwrap();
        assert_eq!(transport.records()[0].subject, "notification.digest.pending");
    }

    #[test]
    fn test_priority_is_clamped() {
        let msg = OutboundMessage::new(Uuid::new_v4(), "k", 99, 1, "c");
        assert_eq!(msg.priority, 9);
    }

    #[test]
    fn test_retry_count_never_exceeds_max() {
        let msg = message(2);
        assert!(msg.retry_count <= msg.max_retries);
    }
}
