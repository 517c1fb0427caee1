//! Bounded single-attempt publisher.

use crate::{MessageBus, OutboxError, OutboxResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Publishes outbox payloads to one topic, waiting at most `timeout` for the
/// broker.
#[derive(Clone)]
pub struct OutboxSender {
    bus: Arc<dyn MessageBus>,
    topic: String,
    timeout: Duration,
}

impl OutboxSender {
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bus,
            topic: topic.into(),
            timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// One publish attempt keyed by event id.
    ///
    /// Timeout and broker errors both come back as `Err`; they differ only in
    /// the error variant and the log line.
    pub async fn send(&self, key: &str, payload: &str) -> OutboxResult<()> {
        match tokio::time::timeout(self.timeout, self.bus.publish(&self.topic, key, payload)).await
        {
            Ok(Ok(())) => {
                debug!(topic = %self.topic, key, "Published");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(topic = %self.topic, key, error = %e, "Publish failed");
                Err(match e {
                    OutboxError::Publish(_) => e,
                    other => OutboxError::Publish(other.to_string()),
                })
            }
            Err(_) => {
                warn!(
                    topic = %self.topic,
                    key,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Publish timed out"
                );
                Err(OutboxError::PublishTimeout(self.timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn publish(&self, topic: &str, key: &str, payload: &str) -> OutboxResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((topic.to_string(), key.to_string(), payload.to_string()));
            Ok(())
        }
    }

    struct BrokenBus;

    #[async_trait]
    impl MessageBus for BrokenBus {
        async fn publish(&self, _: &str, _: &str, _: &str) -> OutboxResult<()> {
            Err(OutboxError::Publish("leader not available".to_string()))
        }
    }

    struct StuckBus;

    #[async_trait]
    impl MessageBus for StuckBus {
        async fn publish(&self, _: &str, _: &str, _: &str) -> OutboxResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_uses_topic_and_key() {
        let bus = Arc::new(RecordingBus::default());
        let sender = OutboxSender::new(bus.clone(), "event-scores", Duration::from_secs(1));

        sender.send("E1", r#"{"eventId":"E1"}"#).await.unwrap();

        let calls = bus.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(
                "event-scores".to_string(),
                "E1".to_string(),
                r#"{"eventId":"E1"}"#.to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_broker_error_is_publish_error() {
        let sender = OutboxSender::new(Arc::new(BrokenBus), "event-scores", Duration::from_secs(1));
        assert!(matches!(
            sender.send("E1", "{}").await,
            Err(OutboxError::Publish(_))
        ));
    }

    #[tokio::test]
    async fn test_stuck_broker_times_out() {
        let timeout = Duration::from_millis(30);
        let sender = OutboxSender::new(Arc::new(StuckBus), "event-scores", timeout);

        let started = std::time::Instant::now();
        let result = sender.send("E1", "{}").await;

        assert!(matches!(result, Err(OutboxError::PublishTimeout(t)) if t == timeout));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
