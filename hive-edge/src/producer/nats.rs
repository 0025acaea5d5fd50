//! NATS JetStream transport
//!
//! JetStream gives the producer the ack-on-receipt semantics the publish
//! contract requires: the returned future resolves once the broker has
//! persisted the message, not when it was merely written to the socket.

use async_nats::jetstream;
use async_trait::async_trait;
use std::time::Duration;

use super::BrokerTransport;
use crate::{
    config::NatsConfig,
    error::{Error, Result},
};

/// Create a NATS client with retry logic
///
/// Uses exponential backoff between attempts; used at startup so a slow
/// broker does not flap the whole service.
pub async fn create_client(config: &NatsConfig) -> Result<async_nats::Client> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_client(config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!("NATS connection established after {} attempt(s)", attempt + 1);
                } else {
                    tracing::info!("NATS client connected to {}", config.url);
                }
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to NATS after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "NATS connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_client(config: &NatsConfig) -> Result<async_nats::Client> {
    let mut opts = async_nats::ConnectOptions::new();

    if let Some(name) = &config.name {
        opts = opts.name(name);
    }

    opts = opts.max_reconnects(Some(config.max_reconnects));

    let client = opts
        .connect(&config.url)
        .await
        .map_err(|e| Error::Nats(format!("Failed to connect to NATS at '{}': {}", config.url, e)))?;

    Ok(client)
}

/// JetStream-backed broker transport
pub struct JetStreamTransport {
    context: jetstream::Context,
}

impl JetStreamTransport {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            context: jetstream::new(client),
        }
    }
}

#[async_trait]
impl BrokerTransport for JetStreamTransport {
    async fn publish(
        &self,
        subject: &str,
        headers: &[(String, String)],
        payload: &[u8],
    ) -> Result<()> {
        let mut header_map = async_nats::HeaderMap::new();
        for (name, value) in headers {
            header_map.insert(name.as_str(), value.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(subject.to_string(), header_map, payload.to_vec().into())
            .await
            .map_err(|e| Error::Nats(format!("Publish to '{}' failed: {}", subject, e)))?;

        // The second await is the broker's receipt acknowledgement
        ack.await
            .map_err(|e| Error::Nats(format!("Broker did not acknowledge '{}': {}", subject, e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_shape() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            name: Some("hive-edge".to_string()),
            max_reconnects: 10,
            max_retries: 5,
            retry_delay_secs: 2,
        };
        assert_eq!(config.max_reconnects, 10);
        assert_eq!(config.name.as_deref(), Some("hive-edge"));
    }
}
