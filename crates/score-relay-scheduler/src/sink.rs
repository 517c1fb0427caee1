//! Where validated readings go.

use async_trait::async_trait;
use score_relay_core::ScoreReading;
use score_relay_outbox::{EnqueueOutcome, OutboxEngine, OutboxResult};

/// Receives every valid reading a poll tick produces.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    async fn submit(&self, reading: &ScoreReading) -> OutboxResult<EnqueueOutcome>;
}

#[async_trait]
impl ScoreSink for OutboxEngine {
    async fn submit(&self, reading: &ScoreReading) -> OutboxResult<EnqueueOutcome> {
        self.enqueue_and_deliver(reading.event_id(), reading.current_score())
            .await
    }
}
