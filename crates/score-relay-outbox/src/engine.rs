//! Outbox engine: persist, attempt, record, and the reconciliation sweep.

use crate::state::{self, FailureTransition};
use crate::{MessageBus, OutboxResult, OutboxSender};
use chrono::{DateTime, Utc};
use score_relay_core::{
    spawn_periodic, Config, PeriodicHandle, ScoreReading, TickMode, ValidationError,
    DEFAULT_TOPIC, EVENT_SCORE_UPDATE,
};
use score_relay_database::{
    queries, AsyncDatabase, Claim, NewOutboxMessage, OutboxMessage, OutboxStatus,
    OutboxStatusCounts,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbox engine configuration.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Topic every score update is published to.
    pub topic: String,
    /// Failed attempts after which a message is permanently failed.
    pub max_retries: u32,
    /// Bounded wait for one publish.
    pub publish_timeout: Duration,
    /// Validity of a delivery claim. Must exceed `publish_timeout`.
    pub claim_lease: Duration,
    /// Attempt delivery right after the insert.
    pub direct_delivery: bool,
    /// Period of the reconciliation sweep.
    pub reconcile_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            max_retries: 5,
            publish_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(30),
            direct_delivery: true,
            reconcile_interval: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for OutboxConfig {
    fn from(config: &Config) -> Self {
        Self {
            topic: config.topic.clone(),
            max_retries: config.max_retries,
            publish_timeout: config.publish_timeout(),
            claim_lease: config.claim_lease(),
            direct_delivery: config.direct_delivery,
            reconcile_interval: config.reconcile_interval(),
        }
    }
}

/// Result of [`OutboxEngine::enqueue_and_deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Input failed validation; nothing was written.
    Rejected(ValidationError),
    /// Written and published.
    Sent(i64),
    /// Written; the immediate attempt failed and the sweep will retry.
    Failed(i64),
    /// Written and left for the sweep (direct delivery disabled).
    Deferred(i64),
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub sent: usize,
    pub failed: usize,
    pub permanently_failed: usize,
    /// Messages another worker held, or that changed before they could be
    /// claimed or finalised.
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn processed(&self) -> usize {
        self.sent + self.failed + self.permanently_failed
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0 && self.skipped == 0
    }
}

/// How one claimed delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Sent,
    Failed,
    PermanentlyFailed,
    /// The claim expired and another worker took the row over. `published`
    /// tells whether this attempt still reached the broker.
    ClaimLost { published: bool },
}

/// A row this worker holds a claim on.
struct ClaimedMessage {
    id: i64,
    event_id: String,
    payload: String,
    status: OutboxStatus,
    retry_count: u32,
    token: String,
}

/// Durable outbox for score updates.
pub struct OutboxEngine {
    db: AsyncDatabase,
    sender: OutboxSender,
    config: OutboxConfig,
}

impl OutboxEngine {
    pub fn new(db: AsyncDatabase, bus: Arc<dyn MessageBus>, config: OutboxConfig) -> Self {
        let sender = OutboxSender::new(bus, config.topic.clone(), config.publish_timeout);
        Self { db, sender, config }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Persist a score update and, unless direct delivery is off, try to
    /// publish it right away.
    ///
    /// Invalid input is logged and reported as `Rejected` without writing a
    /// row. Delivery failures are recorded on the row and left to the sweep;
    /// only storage errors are returned as `Err`.
    pub async fn enqueue_and_deliver(
        &self,
        event_id: &str,
        current_score: &str,
    ) -> OutboxResult<EnqueueOutcome> {
        let reading = match ScoreReading::new(event_id, current_score) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(event_id, current_score, error = %e, "Rejected score update");
                return Ok(EnqueueOutcome::Rejected(e));
            }
        };
        let payload = reading.to_payload()?;

        let now = Utc::now();
        let token = Uuid::new_v4().to_string();
        let claim = self.config.direct_delivery.then(|| Claim {
            token: token.clone(),
            until: self.lease_until(now),
        });

        let message = NewOutboxMessage {
            event_id: reading.event_id().to_string(),
            event_type: EVENT_SCORE_UPDATE.to_string(),
            payload: payload.clone(),
            claim,
        };
        let id = self
            .db
            .call(move |conn| queries::insert_outbox_message(conn, &message, now))
            .await?;
        debug!(message_id = id, event_id, "Outbox message stored");

        if !self.config.direct_delivery {
            return Ok(EnqueueOutcome::Deferred(id));
        }

        let claimed = ClaimedMessage {
            id,
            event_id: reading.event_id().to_string(),
            payload,
            status: OutboxStatus::Pending,
            retry_count: 0,
            token,
        };
        Ok(match self.attempt(claimed).await? {
            AttemptOutcome::Sent | AttemptOutcome::ClaimLost { published: true } => {
                EnqueueOutcome::Sent(id)
            }
            AttemptOutcome::Failed
            | AttemptOutcome::PermanentlyFailed
            | AttemptOutcome::ClaimLost { published: false } => EnqueueOutcome::Failed(id),
        })
    }

    /// Replay undelivered messages.
    ///
    /// FAILED messages that already reached `max_retries` (the cap was
    /// lowered since they last failed) are made PERMANENTLY_FAILED first.
    /// Then PENDING messages go, oldest created first, followed by FAILED
    /// messages with retries left, least recently attempted first. Both sets
    /// are read before any attempt so a message fails at most once per pass.
    /// Rows held by a live claim are not read at all. Errors on individual
    /// messages are logged and counted as skipped.
    pub async fn reconcile(&self) -> OutboxResult<ReconcileReport> {
        let now = Utc::now();
        let max_retries = self.config.max_retries;
        let mut report = ReconcileReport::default();

        let exhausted = self
            .db
            .call(move |conn| {
                queries::mark_exhausted_messages_permanently_failed(conn, max_retries, now)
            })
            .await?;
        for message in &exhausted {
            error!(
                message_id = message.id,
                event_id = %message.event_id,
                retry_count = message.retry_count,
                max_retries,
                "Message is over the retry limit, permanently failed"
            );
        }
        report.permanently_failed += exhausted.len();

        let pending = self
            .db
            .call(move |conn| queries::find_pending_messages(conn, now))
            .await?;
        let failed = self
            .db
            .call(move |conn| queries::find_retryable_failed_messages(conn, max_retries, now))
            .await?;

        for message in pending.into_iter().chain(failed) {
            let message_id = message.id;
            match self.reconcile_one(message).await {
                Ok(Some(AttemptOutcome::Sent)) => report.sent += 1,
                Ok(Some(AttemptOutcome::Failed)) => report.failed += 1,
                Ok(Some(AttemptOutcome::PermanentlyFailed)) => report.permanently_failed += 1,
                Ok(Some(AttemptOutcome::ClaimLost { .. })) | Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(message_id, error = %e, "Reconciliation of message failed");
                    report.skipped += 1;
                }
            }
        }

        if report.is_empty() {
            debug!("Reconciliation found nothing to deliver");
        } else {
            info!(
                sent = report.sent,
                failed = report.failed,
                permanently_failed = report.permanently_failed,
                skipped = report.skipped,
                "Reconciliation pass complete"
            );
        }
        Ok(report)
    }

    /// Run [`reconcile`](Self::reconcile) every `reconcile_interval`, the
    /// first pass immediately. Passes never overlap.
    pub fn start_reconciler(self: &Arc<Self>) -> PeriodicHandle {
        let engine = Arc::clone(self);
        info!(
            interval_ms = self.config.reconcile_interval.as_millis() as u64,
            "Starting outbox reconciler"
        );
        spawn_periodic(
            "outbox-reconciler",
            Duration::ZERO,
            self.config.reconcile_interval,
            TickMode::Sequential,
            move || {
                let engine = engine.clone();
                async move {
                    if let Err(e) = engine.reconcile().await {
                        error!(error = %e, "Reconciliation pass failed");
                    }
                }
            },
        )
    }

    /// Get one message by id.
    pub async fn message(&self, id: i64) -> OutboxResult<Option<OutboxMessage>> {
        Ok(self
            .db
            .call(move |conn| queries::get_outbox_message(conn, id))
            .await?)
    }

    /// All messages with `status`, by id.
    pub async fn messages_with_status(
        &self,
        status: OutboxStatus,
    ) -> OutboxResult<Vec<OutboxMessage>> {
        Ok(self
            .db
            .call(move |conn| queries::list_messages_by_status(conn, status))
            .await?)
    }

    /// Row count per status.
    pub async fn status_counts(&self) -> OutboxResult<OutboxStatusCounts> {
        Ok(self.db.call(queries::count_messages_by_status).await?)
    }

    // ==========================================
    // Delivery
    // ==========================================

    /// Claim a message read by the sweep, then attempt it. `None` means
    /// another worker holds it or it changed since it was read.
    async fn reconcile_one(&self, message: OutboxMessage) -> OutboxResult<Option<AttemptOutcome>> {
        let now = Utc::now();
        let claim = Claim {
            token: Uuid::new_v4().to_string(),
            until: self.lease_until(now),
        };

        let (id, status, retry_count) = (message.id, message.status, message.retry_count);
        let claim_for_update = claim.clone();
        let won = self
            .db
            .call(move |conn| {
                queries::claim_message(conn, id, status, retry_count, &claim_for_update, now)
            })
            .await?;

        if !won {
            debug!(message_id = id, "Message already claimed, skipping");
            return Ok(None);
        }

        let claimed = ClaimedMessage {
            id,
            event_id: message.event_id,
            payload: message.payload,
            status,
            retry_count,
            token: claim.token,
        };
        self.attempt(claimed).await.map(Some)
    }

    /// Publish a claimed message and record the result on its row.
    async fn attempt(&self, message: ClaimedMessage) -> OutboxResult<AttemptOutcome> {
        let ClaimedMessage {
            id,
            event_id,
            payload,
            status,
            retry_count,
            token,
        } = message;

        match self.sender.send(&event_id, &payload).await {
            Ok(()) => {
                state::after_successful_attempt(status)?;
                let now = Utc::now();
                let won = self
                    .db
                    .call(move |conn| queries::mark_message_sent(conn, id, &token, now))
                    .await?;

                if won {
                    info!(message_id = id, event_id = %event_id, retry_count, "Message delivered");
                    Ok(AttemptOutcome::Sent)
                } else {
                    warn!(
                        message_id = id,
                        event_id = %event_id,
                        "Delivered after claim expired; broker may see a duplicate"
                    );
                    Ok(AttemptOutcome::ClaimLost { published: true })
                }
            }
            Err(e) => {
                let FailureTransition {
                    status: next_status,
                    retry_count: next_count,
                } = state::after_failed_attempt(status, retry_count, self.config.max_retries)?;

                let now = Utc::now();
                let won = self
                    .db
                    .call(move |conn| {
                        queries::mark_message_failed(conn, id, &token, retry_count, next_status, now)
                    })
                    .await?;

                if !won {
                    warn!(message_id = id, event_id = %event_id, "Claim lost before failure was recorded");
                    return Ok(AttemptOutcome::ClaimLost { published: false });
                }

                if next_status == OutboxStatus::PermanentlyFailed {
                    error!(
                        message_id = id,
                        event_id = %event_id,
                        retry_count = next_count,
                        error = %e,
                        "Message permanently failed"
                    );
                    Ok(AttemptOutcome::PermanentlyFailed)
                } else {
                    warn!(
                        message_id = id,
                        event_id = %event_id,
                        retry_count = next_count,
                        error = %e,
                        "Delivery failed, will retry"
                    );
                    Ok(AttemptOutcome::Failed)
                }
            }
        }
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        now + lease
    }
}
