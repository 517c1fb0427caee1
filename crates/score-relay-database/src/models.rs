//! Row types for the relay's tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an event is currently being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Live,
    NotLive,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::NotLive => "NOT_LIVE",
        }
    }

    /// Parse the stored / wire form. Matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIVE" => Some(Self::Live),
            "NOT_LIVE" => Some(Self::NotLive),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub event_id: String,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Delivery state of an outbox message.
///
/// ```text
/// PENDING ──► SENT
///    │          ▲
///    ▼          │
/// FAILED ───────┘
///    │ ▲
///    └─┘ (retry)
///    │
///    ▼
/// PERMANENTLY_FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
    PermanentlyFailed,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 4] = [
        Self::Pending,
        Self::Sent,
        Self::Failed,
        Self::PermanentlyFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            "PERMANENTLY_FAILED" => Some(Self::PermanentlyFailed),
            _ => None,
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::PermanentlyFailed)
    }

    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent)
                | (Self::Pending, Self::Failed)
                | (Self::Failed, Self::Sent)
                | (Self::Failed, Self::Failed)
                | (Self::Failed, Self::PermanentlyFailed)
        )
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of `message_outbox`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub claim_token: Option<String>,
    #[serde(skip)]
    pub claimed_until: Option<DateTime<Utc>>,
}

/// A delivery claim on an outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub token: String,
    pub until: DateTime<Utc>,
}

/// New outbox message for insertion. Always starts PENDING with no retries.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    /// Insert the row already claimed by this worker.
    pub claim: Option<Claim>,
}

/// Number of outbox rows per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStatusCounts {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub permanently_failed: u64,
}

impl OutboxStatusCounts {
    pub fn get(&self, status: OutboxStatus) -> u64 {
        match status {
            OutboxStatus::Pending => self.pending,
            OutboxStatus::Sent => self.sent,
            OutboxStatus::Failed => self.failed,
            OutboxStatus::PermanentlyFailed => self.permanently_failed,
        }
    }

    pub(crate) fn set(&mut self, status: OutboxStatus, count: u64) {
        match status {
            OutboxStatus::Pending => self.pending = count,
            OutboxStatus::Sent => self.sent = count,
            OutboxStatus::Failed => self.failed = count,
            OutboxStatus::PermanentlyFailed => self.permanently_failed = count,
        }
    }
}
