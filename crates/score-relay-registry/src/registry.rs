//! Event status store wired to the job scheduler.

use crate::{RegistryError, RegistryResult};
use chrono::Utc;
use score_relay_database::{queries, AsyncDatabase, DatabaseError, Event, EventStatus};
use score_relay_scheduler::JobScheduler;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Event registry.
///
/// Status writes and the matching scheduler call happen under one async
/// mutex, so two concurrent transitions for the same event cannot leave the
/// store saying LIVE while the scheduler has no job (or the reverse).
pub struct EventRegistry {
    db: AsyncDatabase,
    scheduler: Arc<JobScheduler>,
    transitions: Mutex<()>,
}

impl EventRegistry {
    pub fn new(db: AsyncDatabase, scheduler: Arc<JobScheduler>) -> Self {
        Self {
            db,
            scheduler,
            transitions: Mutex::new(()),
        }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Register a new event, starting its poll job if it is LIVE.
    pub async fn add_event(&self, event_id: &str, status: EventStatus) -> RegistryResult<Event> {
        let event_id = validate_event_id(event_id)?;
        let _guard = self.transitions.lock().await;

        let id = event_id.clone();
        let event = self
            .db
            .call(move |conn| queries::insert_event(conn, &id, status, Utc::now()))
            .await
            .map_err(|e| match e {
                DatabaseError::AlreadyExists(_) => RegistryError::AlreadyExists(event_id.clone()),
                other => RegistryError::Database(other),
            })?;

        info!(event_id = %event.event_id, status = %status, "Event added");
        self.apply_status(&event.event_id, status);
        Ok(event)
    }

    /// Change an event's status and start or stop its poll job to match.
    ///
    /// An unknown event leaves the scheduler untouched.
    pub async fn update_status(&self, event_id: &str, status: EventStatus) -> RegistryResult<Event> {
        let _guard = self.transitions.lock().await;

        let id = event_id.to_string();
        let event = self
            .db
            .call(move |conn| {
                if !queries::update_event_status(conn, &id, status, Utc::now())? {
                    return Ok(None);
                }
                queries::get_event(conn, &id)
            })
            .await?
            .ok_or_else(|| RegistryError::NotFound(event_id.to_string()))?;

        info!(event_id, status = %status, "Event status updated");
        self.apply_status(event_id, status);
        Ok(event)
    }

    /// Stored state of an event, if registered.
    pub async fn find_by_id(&self, event_id: &str) -> RegistryResult<Option<Event>> {
        let id = event_id.to_string();
        Ok(self
            .db
            .call(move |conn| queries::get_event(conn, &id))
            .await?)
    }

    /// Start a job for every event stored as LIVE. Run once at startup.
    pub async fn resume_live_jobs(&self) -> RegistryResult<usize> {
        let _guard = self.transitions.lock().await;

        let live = self
            .db
            .call(|conn| queries::list_events_with_status(conn, EventStatus::Live))
            .await?;

        let mut resumed = 0;
        for event in &live {
            if self.scheduler.start_job(&event.event_id) {
                resumed += 1;
            }
        }

        info!(resumed, "Resumed jobs for LIVE events");
        Ok(resumed)
    }

    fn apply_status(&self, event_id: &str, status: EventStatus) {
        match status {
            EventStatus::Live => {
                self.scheduler.start_job(event_id);
            }
            EventStatus::NotLive => {
                if !self.scheduler.stop_job(event_id) {
                    debug!(event_id, "Event was not being polled");
                }
            }
        }
    }
}

fn validate_event_id(event_id: &str) -> RegistryResult<String> {
    if event_id.trim().is_empty() {
        return Err(RegistryError::InvalidEventId);
    }
    Ok(event_id.to_string())
}
