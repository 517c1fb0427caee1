//! Message bus seam and the Redis Streams implementation.

use crate::OutboxResult;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Publishes one payload to a topic. Implementations make a single broker
/// call per invocation and never retry internally.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> OutboxResult<()>;
}

/// Publishes to a Redis stream named after the topic.
///
/// Each message is appended with `XADD <topic> * key <key> value <payload>`.
/// The multiplexed connection is opened on first use and dropped after a
/// failed command, so the next publish reconnects.
pub struct RedisStreamBus {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStreamBus {
    /// Create a bus for `redis_url`. No connection is made until the first
    /// publish.
    pub fn new(redis_url: &str) -> OutboxResult<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> OutboxResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

#[async_trait]
impl MessageBus for RedisStreamBus {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> OutboxResult<()> {
        let mut conn = self.connection().await?;

        let result: RedisResult<String> = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("value")
            .arg(payload)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(entry_id) => {
                debug!(topic, key, entry_id = %entry_id, "Appended to stream");
                Ok(())
            }
            Err(e) => {
                warn!(topic, key, error = %e, "XADD failed, dropping connection");
                *self.conn.lock().await = None;
                Err(e.into())
            }
        }
    }
}
