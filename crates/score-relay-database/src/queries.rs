//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter and is meant to
//! run inside [`crate::AsyncDatabase::call`]. Functions that depend on the
//! current time take it as `now` so callers and tests control the clock.

use crate::{
    Claim, DatabaseError, DatabaseResult, Event, EventStatus, NewOutboxMessage, OutboxMessage,
    OutboxStatus, OutboxStatusCounts,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

// ==========================================
// Events
// ==========================================

/// Insert a new event. Fails with `AlreadyExists` if the id is taken.
pub fn insert_event(
    conn: &Connection,
    event_id: &str,
    status: EventStatus,
    now: DateTime<Utc>,
) -> DatabaseResult<Event> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO events (event_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![event_id, status.as_str(), to_millis(now)],
    )?;

    if inserted == 0 {
        return Err(DatabaseError::AlreadyExists(format!("event {event_id}")));
    }

    Ok(Event {
        event_id: event_id.to_string(),
        status,
        created_at: from_millis(to_millis(now)),
        updated_at: from_millis(to_millis(now)),
    })
}

/// Get an event by id.
pub fn get_event(conn: &Connection, event_id: &str) -> DatabaseResult<Option<Event>> {
    let event = conn
        .query_row(
            "SELECT event_id, status, created_at, updated_at FROM events WHERE event_id = ?1",
            params![event_id],
            event_from_row,
        )
        .optional()?;
    Ok(event)
}

/// Set an event's status. Returns false if the event does not exist.
pub fn update_event_status(
    conn: &Connection,
    event_id: &str,
    status: EventStatus,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE events SET status = ?2, updated_at = ?3 WHERE event_id = ?1",
        params![event_id, status.as_str(), to_millis(now)],
    )?;
    Ok(count > 0)
}

/// List events with the given status, oldest first.
pub fn list_events_with_status(
    conn: &Connection,
    status: EventStatus,
) -> DatabaseResult<Vec<Event>> {
    let mut stmt = conn.prepare_cached(
        "SELECT event_id, status, created_at, updated_at FROM events
         WHERE status = ?1
         ORDER BY created_at ASC, event_id ASC",
    )?;

    let events = stmt
        .query_map(params![status.as_str()], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

// ==========================================
// Message Outbox
// ==========================================

const OUTBOX_COLUMNS: &str = "id, event_id, event_type, payload, status, created_at, sent_at,
     retry_count, last_attempt_at, claim_token, claimed_until";

/// Insert a PENDING message, optionally already claimed. Returns the new id.
pub fn insert_outbox_message(
    conn: &Connection,
    message: &NewOutboxMessage,
    now: DateTime<Utc>,
) -> DatabaseResult<i64> {
    let (token, until) = match &message.claim {
        Some(claim) => (Some(claim.token.as_str()), Some(to_millis(claim.until))),
        None => (None, None),
    };

    conn.execute(
        "INSERT INTO message_outbox
            (event_id, event_type, payload, status, created_at, retry_count, claim_token, claimed_until)
         VALUES (?1, ?2, ?3, 'PENDING', ?4, 0, ?5, ?6)",
        params![
            message.event_id,
            message.event_type,
            message.payload,
            to_millis(now),
            token,
            until
        ],
    )?;

    let id = conn.last_insert_rowid();
    debug!(message_id = id, event_id = %message.event_id, "Outbox message inserted");
    Ok(id)
}

/// Get an outbox message by id.
pub fn get_outbox_message(conn: &Connection, id: i64) -> DatabaseResult<Option<OutboxMessage>> {
    let sql = format!("SELECT {OUTBOX_COLUMNS} FROM message_outbox WHERE id = ?1");
    let message = conn
        .query_row(&sql, params![id], outbox_message_from_row)
        .optional()?;
    Ok(message)
}

/// PENDING messages without a live claim, oldest first.
pub fn find_pending_messages(
    conn: &Connection,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxMessage>> {
    let sql = format!(
        "SELECT {OUTBOX_COLUMNS} FROM message_outbox
         WHERE status = 'PENDING'
           AND (claimed_until IS NULL OR claimed_until <= ?1)
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![to_millis(now)], outbox_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// FAILED messages with retries left and without a live claim, least recently
/// attempted first.
pub fn find_retryable_failed_messages(
    conn: &Connection,
    max_retries: u32,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxMessage>> {
    let sql = format!(
        "SELECT {OUTBOX_COLUMNS} FROM message_outbox
         WHERE status = 'FAILED'
           AND retry_count < ?1
           AND (claimed_until IS NULL OR claimed_until <= ?2)
         ORDER BY last_attempt_at ASC, id ASC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![max_retries, to_millis(now)], outbox_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Move FAILED messages whose retry count already reached `max_retries` to
/// PERMANENTLY_FAILED. Such rows appear when the cap is lowered between runs.
/// Rows under a live claim are left alone. Returns the moved messages.
pub fn mark_exhausted_messages_permanently_failed(
    conn: &Connection,
    max_retries: u32,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxMessage>> {
    let sql = format!(
        "UPDATE message_outbox
         SET status = 'PERMANENTLY_FAILED'
         WHERE status = 'FAILED'
           AND retry_count >= ?1
           AND (claimed_until IS NULL OR claimed_until <= ?2)
         RETURNING {OUTBOX_COLUMNS}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![max_retries, to_millis(now)], outbox_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Claim a message for delivery.
///
/// Succeeds only if the row still has `expected_status` and
/// `expected_retry_count` and carries no live claim. Returns whether this
/// caller won the claim.
pub fn claim_message(
    conn: &Connection,
    id: i64,
    expected_status: OutboxStatus,
    expected_retry_count: u32,
    claim: &Claim,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    if expected_status.is_terminal() {
        return Ok(false);
    }

    let count = conn.execute(
        "UPDATE message_outbox
         SET claim_token = ?4, claimed_until = ?5
         WHERE id = ?1
           AND status = ?2
           AND retry_count = ?3
           AND (claimed_until IS NULL OR claimed_until <= ?6)",
        params![
            id,
            expected_status.as_str(),
            expected_retry_count,
            claim.token,
            to_millis(claim.until),
            to_millis(now)
        ],
    )?;
    Ok(count == 1)
}

/// Finalise a claimed message as SENT. Returns false if the claim was lost.
pub fn mark_message_sent(
    conn: &Connection,
    id: i64,
    claim_token: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE message_outbox
         SET status = 'SENT', sent_at = ?3, last_attempt_at = ?3,
             claim_token = NULL, claimed_until = NULL
         WHERE id = ?1
           AND claim_token = ?2
           AND status IN ('PENDING', 'FAILED')",
        params![id, claim_token, to_millis(now)],
    )?;
    Ok(count == 1)
}

/// Record a failed delivery attempt on a claimed message.
///
/// The retry count moves from `expected_retry_count` to one more than that.
/// `next_status` must be FAILED or PERMANENTLY_FAILED. Returns false if the
/// claim was lost or the row changed underneath the caller.
pub fn mark_message_failed(
    conn: &Connection,
    id: i64,
    claim_token: &str,
    expected_retry_count: u32,
    next_status: OutboxStatus,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    if !matches!(
        next_status,
        OutboxStatus::Failed | OutboxStatus::PermanentlyFailed
    ) {
        return Err(DatabaseError::InvalidData(format!(
            "{next_status} is not a failure status"
        )));
    }

    let count = conn.execute(
        "UPDATE message_outbox
         SET status = ?4, retry_count = retry_count + 1, last_attempt_at = ?5,
             claim_token = NULL, claimed_until = NULL
         WHERE id = ?1
           AND claim_token = ?2
           AND retry_count = ?3
           AND status IN ('PENDING', 'FAILED')",
        params![
            id,
            claim_token,
            expected_retry_count,
            next_status.as_str(),
            to_millis(now)
        ],
    )?;
    Ok(count == 1)
}

/// All messages with the given status, by id.
pub fn list_messages_by_status(
    conn: &Connection,
    status: OutboxStatus,
) -> DatabaseResult<Vec<OutboxMessage>> {
    let sql = format!("SELECT {OUTBOX_COLUMNS} FROM message_outbox WHERE status = ?1 ORDER BY id ASC");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![status.as_str()], outbox_message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Count messages per status.
pub fn count_messages_by_status(conn: &Connection) -> DatabaseResult<OutboxStatusCounts> {
    let mut stmt =
        conn.prepare_cached("SELECT status, COUNT(*) FROM message_outbox GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                parse_outbox_status(row, 0)?,
                row.get::<_, i64>(1)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = OutboxStatusCounts::default();
    for (status, count) in rows {
        counts.set(status, u64::try_from(count).unwrap_or(0));
    }
    Ok(counts)
}

// ==========================================
// Helpers
// ==========================================

/// Timestamps are stored as Unix milliseconds.
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Inverse of [`to_millis`]. Out-of-range values map to the Unix epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn invalid_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(DatabaseError::InvalidData(message)),
    )
}

fn parse_outbox_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<OutboxStatus> {
    let raw: String = row.get(idx)?;
    OutboxStatus::parse(&raw).ok_or_else(|| invalid_column(idx, format!("outbox status {raw:?}")))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let raw_status: String = row.get(1)?;
    let status = EventStatus::parse(&raw_status)
        .ok_or_else(|| invalid_column(1, format!("event status {raw_status:?}")))?;

    Ok(Event {
        event_id: row.get(0)?,
        status,
        created_at: from_millis(row.get(2)?),
        updated_at: from_millis(row.get(3)?),
    })
}

fn outbox_message_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.get(0)?,
        event_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        status: parse_outbox_status(row, 4)?,
        created_at: from_millis(row.get(5)?),
        sent_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
        retry_count: row.get(7)?,
        last_attempt_at: row.get::<_, Option<i64>>(8)?.map(from_millis),
        claim_token: row.get(9)?,
        claimed_until: row.get::<_, Option<i64>>(10)?.map(from_millis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::Duration;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn at(ms: i64) -> DateTime<Utc> {
        from_millis(1_700_000_000_000 + ms)
    }

    fn new_message(event_id: &str, claim: Option<Claim>) -> NewOutboxMessage {
        NewOutboxMessage {
            event_id: event_id.to_string(),
            event_type: "EVENT_SCORE_UPDATE".to_string(),
            payload: format!(r#"{{"eventId":"{event_id}","currentScore":"1:0"}}"#),
            claim,
        }
    }

    fn claim(token: &str, until: DateTime<Utc>) -> Claim {
        Claim {
            token: token.to_string(),
            until,
        }
    }

    #[test]
    fn test_event_insert_get_update() {
        let conn = create_test_db();

        let event = insert_event(&conn, "E1", EventStatus::Live, at(0)).unwrap();
        assert_eq!(event.status, EventStatus::Live);

        let stored = get_event(&conn, "E1").unwrap().unwrap();
        assert_eq!(stored, event);

        assert!(update_event_status(&conn, "E1", EventStatus::NotLive, at(10)).unwrap());
        let stored = get_event(&conn, "E1").unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::NotLive);
        assert_eq!(stored.updated_at, at(10));
        assert_eq!(stored.created_at, at(0));

        assert!(!update_event_status(&conn, "missing", EventStatus::Live, at(20)).unwrap());
        assert!(get_event(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_event_rejected() {
        let conn = create_test_db();
        insert_event(&conn, "E1", EventStatus::NotLive, at(0)).unwrap();

        let result = insert_event(&conn, "E1", EventStatus::Live, at(1));
        assert!(matches!(result, Err(DatabaseError::AlreadyExists(_))));
        assert_eq!(
            get_event(&conn, "E1").unwrap().unwrap().status,
            EventStatus::NotLive
        );
    }

    #[test]
    fn test_list_events_with_status() {
        let conn = create_test_db();
        insert_event(&conn, "E2", EventStatus::Live, at(2)).unwrap();
        insert_event(&conn, "E1", EventStatus::Live, at(1)).unwrap();
        insert_event(&conn, "E3", EventStatus::NotLive, at(3)).unwrap();

        let live: Vec<String> = list_events_with_status(&conn, EventStatus::Live)
            .unwrap()
            .into_iter()
            .map(|e| e.event_id)
            .collect();
        assert_eq!(live, vec!["E1", "E2"]);
    }

    #[test]
    fn test_insert_outbox_message_starts_pending() {
        let conn = create_test_db();
        let id = insert_outbox_message(&conn, &new_message("E1", None), at(0)).unwrap();

        let message = get_outbox_message(&conn, id).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Pending);
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.sent_at, None);
        assert_eq!(message.last_attempt_at, None);
        assert_eq!(message.created_at, at(0));
        assert_eq!(message.event_type, "EVENT_SCORE_UPDATE");
    }

    #[test]
    fn test_pending_order_and_claim_visibility() {
        let conn = create_test_db();
        let second = insert_outbox_message(&conn, &new_message("E1", None), at(20)).unwrap();
        let first = insert_outbox_message(&conn, &new_message("E2", None), at(10)).unwrap();
        let claimed = insert_outbox_message(
            &conn,
            &new_message("E3", Some(claim("direct", at(100)))),
            at(5),
        )
        .unwrap();

        let ids: Vec<i64> = find_pending_messages(&conn, at(50))
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first, second]);

        // Once the lease runs out the row is eligible again.
        let ids: Vec<i64> = find_pending_messages(&conn, at(100))
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![claimed, first, second]);
    }

    #[test]
    fn test_claim_is_exclusive_until_lease_expires() {
        let conn = create_test_db();
        let id = insert_outbox_message(&conn, &new_message("E1", None), at(0)).unwrap();

        let a = claim("a", at(100));
        let b = claim("b", at(200));

        assert!(claim_message(&conn, id, OutboxStatus::Pending, 0, &a, at(10)).unwrap());
        assert!(!claim_message(&conn, id, OutboxStatus::Pending, 0, &b, at(50)).unwrap());
        assert!(claim_message(&conn, id, OutboxStatus::Pending, 0, &b, at(100)).unwrap());

        // The worker whose lease was taken over cannot finalise.
        assert!(!mark_message_sent(&conn, id, "a", at(110)).unwrap());
        assert!(mark_message_sent(&conn, id, "b", at(120)).unwrap());

        let message = get_outbox_message(&conn, id).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Sent);
        assert_eq!(message.sent_at, Some(at(120)));
        assert_eq!(message.claim_token, None);
    }

    #[test]
    fn test_claim_requires_expected_state() {
        let conn = create_test_db();
        let id = insert_outbox_message(&conn, &new_message("E1", None), at(0)).unwrap();
        let c = claim("c", at(100));

        assert!(!claim_message(&conn, id, OutboxStatus::Failed, 0, &c, at(1)).unwrap());
        assert!(!claim_message(&conn, id, OutboxStatus::Pending, 1, &c, at(1)).unwrap());
        assert!(!claim_message(&conn, id, OutboxStatus::Sent, 0, &c, at(1)).unwrap());
        assert!(!claim_message(&conn, 999, OutboxStatus::Pending, 0, &c, at(1)).unwrap());
    }

    #[test]
    fn test_failed_attempts_increment_retry_count() {
        let conn = create_test_db();
        let id = insert_outbox_message(&conn, &new_message("E1", Some(claim("t0", at(100)))), at(0))
            .unwrap();

        assert!(mark_message_failed(&conn, id, "t0", 0, OutboxStatus::Failed, at(10)).unwrap());
        let message = get_outbox_message(&conn, id).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Failed);
        assert_eq!(message.retry_count, 1);
        assert_eq!(message.last_attempt_at, Some(at(10)));
        assert_eq!(message.claimed_until, None);

        let retryable = find_retryable_failed_messages(&conn, 5, at(20)).unwrap();
        assert_eq!(retryable.len(), 1);

        assert!(claim_message(&conn, id, OutboxStatus::Failed, 1, &claim("t1", at(200)), at(20)).unwrap());
        // Stale retry count loses.
        assert!(!mark_message_failed(&conn, id, "t1", 0, OutboxStatus::Failed, at(30)).unwrap());
        assert!(mark_message_failed(&conn, id, "t1", 1, OutboxStatus::PermanentlyFailed, at(30)).unwrap());

        let message = get_outbox_message(&conn, id).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::PermanentlyFailed);
        assert_eq!(message.retry_count, 2);
        assert!(find_retryable_failed_messages(&conn, 5, at(40)).unwrap().is_empty());
        assert!(find_pending_messages(&conn, at(40)).unwrap().is_empty());
    }

    #[test]
    fn test_mark_failed_rejects_non_failure_status() {
        let conn = create_test_db();
        let id = insert_outbox_message(&conn, &new_message("E1", Some(claim("t", at(100)))), at(0))
            .unwrap();

        let result = mark_message_failed(&conn, id, "t", 0, OutboxStatus::Sent, at(1));
        assert!(matches!(result, Err(DatabaseError::InvalidData(_))));
    }

    #[test]
    fn test_retryable_failed_excludes_exhausted_and_orders_by_attempt() {
        let conn = create_test_db();
        let mut ids = Vec::new();
        for (i, attempt_at) in [30, 10, 20].into_iter().enumerate() {
            let token = format!("t{i}");
            let id = insert_outbox_message(
                &conn,
                &new_message("E1", Some(claim(&token, at(1_000)))),
                at(i as i64),
            )
            .unwrap();
            mark_message_failed(&conn, id, &token, 0, OutboxStatus::Failed, at(attempt_at))
                .unwrap();
            ids.push(id);
        }

        // Simulate a row that already used its budget.
        conn.execute(
            "UPDATE message_outbox SET retry_count = 5 WHERE id = ?1",
            params![ids[0]],
        )
        .unwrap();

        let order: Vec<i64> = find_retryable_failed_messages(&conn, 5, at(100))
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(order, vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_exhausted_failed_messages_become_permanently_failed() {
        let conn = create_test_db();
        let mut ids = Vec::new();
        for (i, retry_count) in [3, 2, 4].into_iter().enumerate() {
            let token = format!("t{i}");
            let id = insert_outbox_message(
                &conn,
                &new_message("E1", Some(claim(&token, at(1_000)))),
                at(i as i64),
            )
            .unwrap();
            mark_message_failed(&conn, id, &token, 0, OutboxStatus::Failed, at(10)).unwrap();
            conn.execute(
                "UPDATE message_outbox SET retry_count = ?2 WHERE id = ?1",
                params![id, retry_count],
            )
            .unwrap();
            ids.push(id);
        }
        // A live claim protects the row with retry_count 4 for now.
        assert!(claim_message(&conn, ids[2], OutboxStatus::Failed, 4, &claim("held", at(500)), at(20)).unwrap());

        let moved: Vec<i64> = mark_exhausted_messages_permanently_failed(&conn, 3, at(100))
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(moved, vec![ids[0]]);

        let message = get_outbox_message(&conn, ids[0]).unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::PermanentlyFailed);
        assert_eq!(message.retry_count, 3);
        assert_eq!(get_outbox_message(&conn, ids[1]).unwrap().unwrap().status, OutboxStatus::Failed);
        assert_eq!(get_outbox_message(&conn, ids[2]).unwrap().unwrap().status, OutboxStatus::Failed);

        // Once the claim expires the remaining exhausted row moves too.
        let moved = mark_exhausted_messages_permanently_failed(&conn, 3, at(600)).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, ids[2]);
        assert_eq!(moved[0].status, OutboxStatus::PermanentlyFailed);
    }

    #[test]
    fn test_status_counts_and_listing() {
        let conn = create_test_db();
        let sent = insert_outbox_message(&conn, &new_message("E1", Some(claim("s", at(100)))), at(0))
            .unwrap();
        mark_message_sent(&conn, sent, "s", at(1)).unwrap();
        insert_outbox_message(&conn, &new_message("E1", None), at(2)).unwrap();
        insert_outbox_message(&conn, &new_message("E2", None), at(3)).unwrap();

        let counts = count_messages_by_status(&conn).unwrap();
        assert_eq!(
            counts,
            OutboxStatusCounts {
                pending: 2,
                sent: 1,
                failed: 0,
                permanently_failed: 0,
            }
        );
        assert_eq!(counts.get(OutboxStatus::Pending), 2);

        let pending = list_messages_by_status(&conn, OutboxStatus::Pending).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = from_millis(to_millis(Utc::now()));
        assert_eq!(from_millis(to_millis(now)), now);
        assert_eq!(now + Duration::milliseconds(1), from_millis(to_millis(now) + 1));
    }
}
