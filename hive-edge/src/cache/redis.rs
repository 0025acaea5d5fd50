//! Redis-backed cache implementation
//!
//! Pooled through deadpool-redis for data-plane commands; subscriptions use
//! a dedicated connection per subscriber because Redis pub/sub takes the
//! connection out of request/response mode.

use async_trait::async_trait;
use deadpool_redis::{Config as DeadpoolConfig, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use std::ops::DerefMut;
use std::time::Duration;
use tokio::sync::mpsc;

use super::Cache;
use crate::{
    config::RedisConfig,
    error::{Error, Result},
};

/// Compare-and-set as a single atomic script
///
/// ARGV[1] = expected value, ARGV[2] = new value, ARGV[3] = ttl seconds
/// (0 = none), ARGV[4] = "1" when the key is expected to be absent.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
local ok
if ARGV[4] == '1' then
  ok = (cur == false)
else
  ok = (cur ~= false and cur == ARGV[1])
end
if ok then
  if tonumber(ARGV[3]) > 0 then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
  else
    redis.call('SET', KEYS[1], ARGV[2])
  end
  return 1
end
return 0
"#;

/// Create a Redis connection pool with retry logic
///
/// Uses exponential backoff between attempts; used at startup so a slow
/// Redis does not flap the whole service.
pub async fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!("Redis connection established after {} attempt(s)", attempt + 1);
                } else {
                    tracing::info!(
                        "Redis connection pool created: max_connections={}",
                        config.max_connections
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to Redis after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    "Redis connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| Error::Internal(format!("Failed to build Redis pool: {}", e)))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create Redis pool: {}", e)))?;

    // Test the connection
    let conn = pool
        .get()
        .await
        .map_err(|e| Error::Internal(format!("Failed to get Redis connection: {}", e)))?;
    drop(conn);

    Ok(pool)
}

/// Redis cache handle
#[derive(Clone)]
pub struct RedisCache {
    pool: Pool,
    client: redis::Client,
}

impl RedisCache {
    /// Connect a cache handle, retrying per the configuration
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Internal(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self { pool, client })
    }

    /// Build from an existing pool and client
    pub fn new(pool: Pool, client: redis::Client) -> Self {
        Self { pool, client }
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Unavailable(format!("Cache connection unavailable: {}", e)))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_on_create: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(conn.deref_mut())
            .await?;

        // First increment created the key; attach the window TTL
        if count == 1 {
            if let Some(ttl) = ttl_on_create {
                let _: () = redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs() as i64)
                    .query_async(conn.deref_mut())
                    .await?;
            }
        }

        Ok(count)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(CAS_SCRIPT);
        let swapped: i64 = script
            .key(key)
            .arg(expected.unwrap_or(""))
            .arg(new)
            .arg(ttl.map(|t| t.as_secs()).unwrap_or(0))
            .arg(if expected.is_none() { "1" } else { "0" })
            .invoke_async(conn.deref_mut())
            .await?;
        Ok(swapped == 1)
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, member).await?;
        if let Some(ttl) = ttl {
            conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_size(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let size: u64 = conn.scard(key).await?;
        Ok(size)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn().await?;

        // Cursor-based SCAN so the server is never blocked by a KEYS sweep
        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(conn.deref_mut())
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = conn.del(&keys).await?;
        Ok(deleted)
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Unavailable(format!("Cache pub/sub unavailable: {}", e)))?;
        pubsub.subscribe(topic).await?;

        let (tx, rx) = mpsc::channel(64);
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(topic = %topic, "Dropping unreadable pub/sub payload: {}", e);
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Subscriber went away
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_script_shape() {
        // The script must read the key exactly once and set at most once
        assert_eq!(CAS_SCRIPT.matches("redis.call('GET'").count(), 1);
        assert_eq!(CAS_SCRIPT.matches("redis.call('SET'").count(), 2);
    }

    #[test]
    fn test_redis_config_defaults() {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            max_connections: 20,
            connection_timeout_secs: 10,
            max_retries: 5,
            retry_delay_secs: 2,
        };
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.max_retries, 5);
    }
}
