//! Outbox state machine guard.
//!
//! The retry counter only ever moves up by one per failed attempt and the
//! status only moves along the edges allowed by
//! [`OutboxStatus::can_transition_to`].

use crate::{OutboxError, OutboxResult};
use score_relay_database::OutboxStatus;

/// Where a message goes after a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub status: OutboxStatus,
    pub retry_count: u32,
}

/// Status after a successful delivery attempt.
pub fn after_successful_attempt(current: OutboxStatus) -> OutboxResult<OutboxStatus> {
    guard(current, OutboxStatus::Sent)?;
    Ok(OutboxStatus::Sent)
}

/// Status and retry count after a failed delivery attempt.
///
/// The message becomes PERMANENTLY_FAILED once the new count reaches
/// `max_retries`, otherwise FAILED.
pub fn after_failed_attempt(
    current: OutboxStatus,
    retry_count: u32,
    max_retries: u32,
) -> OutboxResult<FailureTransition> {
    let next_count = retry_count.saturating_add(1);
    let next_status = if next_count >= max_retries {
        OutboxStatus::PermanentlyFailed
    } else {
        OutboxStatus::Failed
    };

    guard(current, next_status)?;
    Ok(FailureTransition {
        status: next_status,
        retry_count: next_count,
    })
}

fn guard(from: OutboxStatus, to: OutboxStatus) -> OutboxResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(OutboxError::InvalidTransition { from, to })
    }
}
