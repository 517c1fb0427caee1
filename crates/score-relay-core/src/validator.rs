//! Score reading validation.
//!
//! A provider response is a [`RawScoreReading`]; only a reading with a
//! non-blank event id and a score of the form `<digits>:<digits>` becomes a
//! [`ScoreReading`] and may reach the outbox.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

static SCORE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+:[0-9]+$").expect("score pattern is a valid regex"));

/// Why a reading was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event id is empty")]
    EmptyEventId,

    #[error("score is missing")]
    MissingScore,

    #[error("malformed score {0:?}, expected <home>:<away>")]
    MalformedScore(String),
}

/// A reading as returned by the score provider, fields possibly absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawScoreReading {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub current_score: Option<String>,
}

impl RawScoreReading {
    pub fn new(event_id: impl Into<String>, current_score: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            current_score: Some(current_score.into()),
        }
    }

    /// Validate into a [`ScoreReading`].
    pub fn validate(self) -> Result<ScoreReading, ValidationError> {
        let event_id = self.event_id.unwrap_or_default();
        let current_score = self.current_score.ok_or(ValidationError::MissingScore)?;
        ScoreReading::new(event_id, current_score)
    }
}

/// A structurally valid score reading. Serializes to the bus payload
/// `{"eventId": .., "currentScore": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReading {
    event_id: String,
    current_score: String,
}

impl ScoreReading {
    pub fn new(
        event_id: impl Into<String>,
        current_score: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let event_id = event_id.into();
        let current_score = current_score.into();

        if event_id.trim().is_empty() {
            return Err(ValidationError::EmptyEventId);
        }
        if !SCORE_PATTERN.is_match(&current_score) {
            return Err(ValidationError::MalformedScore(current_score));
        }

        Ok(Self {
            event_id,
            current_score,
        })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn current_score(&self) -> &str {
        &self.current_score
    }

    /// JSON payload stored in the outbox and published to the bus.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Predicate form of the validator.
pub fn is_valid_score_reading(event_id: Option<&str>, current_score: Option<&str>) -> bool {
    match (event_id, current_score) {
        (Some(id), Some(score)) => ScoreReading::new(id, score).is_ok(),
        _ => false,
    }
}
