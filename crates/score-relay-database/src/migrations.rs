//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{current_version} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_events(conn)?;
    }
    if current_version < 2 {
        migrate_v2_message_outbox(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: events and their LIVE / NOT_LIVE status.
fn migrate_v1_events(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: events");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK (status IN ('LIVE', 'NOT_LIVE')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_status ON events(status);
        ",
    )?;

    record_migration(conn, 1, "events")
}

/// V2: message outbox with retry metadata and delivery claims.
fn migrate_v2_message_outbox(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: message outbox");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS message_outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'SENT', 'FAILED', 'PERMANENTLY_FAILED')),
            created_at INTEGER NOT NULL,
            sent_at INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
            last_attempt_at INTEGER,
            claim_token TEXT,
            claimed_until INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_message_outbox_status_created
            ON message_outbox(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_message_outbox_status_last_attempt
            ON message_outbox(status, last_attempt_at);
        ",
    )?;

    record_migration(conn, 2, "message_outbox")
}
