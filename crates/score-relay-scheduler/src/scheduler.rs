//! Job scheduler: one recurring poll job per event id.

use crate::{ScoreProvider, ScoreSink};
use score_relay_core::{spawn_periodic, Config, PeriodicHandle, TickMode};
use score_relay_outbox::EnqueueOutcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Poll timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub initial_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            initial_delay: config.poll_initial_delay(),
        }
    }
}

/// Keeps at most one active poll job per event id.
///
/// The job map lock is held only for the stop-old/register-new swap, never
/// across an await, so concurrent `start_job` calls for the same id always
/// leave exactly one job behind. Ticks run on their own tasks; stopping a
/// job prevents future ticks but lets a running one finish.
pub struct JobScheduler {
    jobs: Mutex<HashMap<String, PeriodicHandle>>,
    provider: Arc<dyn ScoreProvider>,
    sink: Arc<dyn ScoreSink>,
    config: SchedulerConfig,
    shut_down: AtomicBool,
}

impl JobScheduler {
    pub fn new(
        provider: Arc<dyn ScoreProvider>,
        sink: Arc<dyn ScoreSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            provider,
            sink,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start polling `event_id`, replacing any job already registered for it.
    ///
    /// Returns false only after [`shutdown`](Self::shutdown).
    pub fn start_job(&self, event_id: &str) -> bool {
        let mut jobs = self.lock_jobs();

        if self.shut_down.load(Ordering::SeqCst) {
            warn!(event_id, "Scheduler is shut down, not starting job");
            return false;
        }

        if let Some(previous) = jobs.remove(event_id) {
            previous.cancel();
            debug!(event_id, "Stopped existing job before restart");
        }

        let provider = self.provider.clone();
        let sink = self.sink.clone();
        let job_event_id = event_id.to_string();
        let handle = spawn_periodic(
            format!("poll:{event_id}"),
            self.config.initial_delay,
            self.config.poll_interval,
            TickMode::Detached,
            move || poll_once(provider.clone(), sink.clone(), job_event_id.clone()),
        );
        jobs.insert(event_id.to_string(), handle);

        info!(
            event_id,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Job started"
        );
        true
    }

    /// Stop polling `event_id`. Returns whether a job was registered.
    pub fn stop_job(&self, event_id: &str) -> bool {
        let removed = self.lock_jobs().remove(event_id);
        match removed {
            Some(handle) => {
                handle.cancel();
                info!(event_id, "Job stopped");
                true
            }
            None => {
                debug!(event_id, "No job to stop");
                false
            }
        }
    }

    /// Whether a non-cancelled, non-finished job is registered for `event_id`.
    pub fn is_job_running(&self, event_id: &str) -> bool {
        self.lock_jobs()
            .get(event_id)
            .is_some_and(PeriodicHandle::is_active)
    }

    /// Event ids with an active job, sorted.
    pub fn running_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_jobs()
            .iter()
            .filter(|(_, handle)| handle.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancel every job and refuse new ones. In-flight ticks are not awaited.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let jobs: Vec<(String, PeriodicHandle)> = self.lock_jobs().drain().collect();
        for (_, handle) in &jobs {
            handle.cancel();
        }
        info!(stopped = jobs.len(), "Scheduler shut down");
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, PeriodicHandle>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One tick: fetch, validate, hand off. Never fails past this boundary.
async fn poll_once(provider: Arc<dyn ScoreProvider>, sink: Arc<dyn ScoreSink>, event_id: String) {
    let raw = match provider.fetch_score(&event_id).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "Score poll failed");
            return;
        }
    };

    let reading = match raw.validate() {
        Ok(reading) => reading,
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "Invalid score reading, skipping");
            return;
        }
    };

    if reading.event_id() != event_id {
        debug!(
            event_id = %event_id,
            reading_event_id = reading.event_id(),
            "Provider returned a reading for a different event id"
        );
    }

    match sink.submit(&reading).await {
        Ok(EnqueueOutcome::Rejected(e)) => {
            warn!(event_id = %event_id, error = %e, "Reading rejected by outbox");
        }
        Ok(outcome) => debug!(event_id = %event_id, ?outcome, "Score update handed off"),
        Err(e) => error!(event_id = %event_id, error = %e, "Failed to store score update"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ProviderError, ProviderResult};
    use async_trait::async_trait;
    use score_relay_core::{RawScoreReading, ScoreReading};
    use score_relay_outbox::OutboxResult;
    use std::sync::atomic::AtomicUsize;

    /// Provider returning a fixed answer and counting calls per event.
    struct FakeProvider {
        answer: fn(&str) -> ProviderResult<RawScoreReading>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl FakeProvider {
        fn new(answer: fn(&str) -> ProviderResult<RawScoreReading>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: Mutex::new(HashMap::new()),
            })
        }

        fn scoring() -> Arc<Self> {
            Self::new(|id| Ok(RawScoreReading::new(id, "2:1")))
        }

        fn calls(&self, event_id: &str) -> usize {
            self.calls.lock().unwrap().get(event_id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ScoreProvider for FakeProvider {
        async fn fetch_score(&self, event_id: &str) -> ProviderResult<RawScoreReading> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(event_id.to_string())
                .or_default() += 1;
            (self.answer)(event_id)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        readings: Mutex<Vec<ScoreReading>>,
        submissions: AtomicUsize,
    }

    #[async_trait]
    impl ScoreSink for RecordingSink {
        async fn submit(&self, reading: &ScoreReading) -> OutboxResult<EnqueueOutcome> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            self.readings.lock().unwrap().push(reading.clone());
            Ok(EnqueueOutcome::Sent(1))
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            initial_delay: Duration::from_millis(10),
        }
    }

    fn scheduler(
        provider: Arc<FakeProvider>,
        sink: Arc<RecordingSink>,
        config: SchedulerConfig,
    ) -> JobScheduler {
        JobScheduler::new(provider, sink, config)
    }

    #[tokio::test]
    async fn test_start_job_polls_and_submits() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink.clone(), fast_config());

        assert!(scheduler.start_job("E1"));
        assert!(scheduler.is_job_running("E1"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        scheduler.stop_job("E1");

        assert!(provider.calls("E1") >= 2);
        let readings = sink.readings.lock().unwrap();
        assert!(!readings.is_empty());
        assert_eq!(readings[0], ScoreReading::new("E1", "2:1").unwrap());
    }

    #[tokio::test]
    async fn test_initial_delay_before_first_poll() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let config = SchedulerConfig {
            poll_interval: Duration::from_millis(20),
            initial_delay: Duration::from_millis(300),
        };
        let scheduler = scheduler(provider.clone(), sink, config);

        scheduler.start_job("E1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls("E1"), 0);
        assert!(scheduler.is_job_running("E1"));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(provider.calls("E1") >= 1);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_restart_leaves_one_job() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink, fast_config());

        scheduler.start_job("E1");
        scheduler.start_job("E1");
        assert_eq!(scheduler.running_jobs(), vec!["E1"]);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(scheduler.stop_job("E1"));
        assert!(!scheduler.is_job_running("E1"));

        // If the first job had survived the restart it would keep polling.
        tokio::time::sleep(Duration::from_millis(40)).await;
        let settled = provider.calls("E1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls("E1"), settled);
    }

    #[tokio::test]
    async fn test_concurrent_starts_leave_one_job() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let scheduler = Arc::new(scheduler(provider.clone(), sink, fast_config()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move { scheduler.start_job("E1") }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(scheduler.running_jobs(), vec!["E1"]);

        scheduler.stop_job("E1");
        tokio::time::sleep(Duration::from_millis(40)).await;
        let settled = provider.calls("E1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.calls("E1"), settled);
    }

    #[tokio::test]
    async fn test_stop_unknown_job_is_noop() {
        let scheduler = scheduler(
            FakeProvider::scoring(),
            Arc::new(RecordingSink::default()),
            fast_config(),
        );

        assert!(!scheduler.stop_job("missing"));
        assert!(!scheduler.stop_job("missing"));
        assert!(!scheduler.is_job_running("missing"));
    }

    #[tokio::test]
    async fn test_provider_failure_skips_submit() {
        let provider = FakeProvider::new(|_| Err(ProviderError::Status(503)));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink.clone(), fast_config());

        scheduler.start_job("E1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The job keeps polling after failures.
        assert!(provider.calls("E1") >= 2);
        assert!(scheduler.is_job_running("E1"));
        assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_reading_skips_submit() {
        let provider = FakeProvider::new(|id| Ok(RawScoreReading::new(id, "two-one")));
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink.clone(), fast_config());

        scheduler.start_job("E1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown();

        assert!(provider.calls("E1") >= 1);
        assert_eq!(sink.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_jobs_are_independent_per_event() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink, fast_config());

        scheduler.start_job("E2");
        scheduler.start_job("E1");
        assert_eq!(scheduler.running_jobs(), vec!["E1", "E2"]);

        scheduler.stop_job("E1");
        assert!(!scheduler.is_job_running("E1"));
        assert!(scheduler.is_job_running("E2"));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything_and_refuses_new_jobs() {
        let provider = FakeProvider::scoring();
        let sink = Arc::new(RecordingSink::default());
        let scheduler = scheduler(provider.clone(), sink, fast_config());

        scheduler.start_job("E1");
        scheduler.start_job("E2");
        scheduler.shutdown();

        assert!(scheduler.running_jobs().is_empty());
        assert!(!scheduler.is_job_running("E1"));
        assert!(!scheduler.start_job("E3"));
        assert!(!scheduler.is_job_running("E3"));
    }

    #[tokio::test]
    async fn test_poll_once_feeds_outbox_engine() {
        use score_relay_database::{AsyncDatabase, OutboxStatus};
        use score_relay_outbox::{MessageBus, OutboxConfig, OutboxEngine};

        struct AcceptingBus;

        #[async_trait]
        impl MessageBus for AcceptingBus {
            async fn publish(&self, _: &str, _: &str, _: &str) -> OutboxResult<()> {
                Ok(())
            }
        }

        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let engine = Arc::new(OutboxEngine::new(
            db,
            Arc::new(AcceptingBus),
            OutboxConfig::default(),
        ));

        poll_once(FakeProvider::scoring(), engine.clone(), "E1".to_string()).await;

        let sent = engine.messages_with_status(OutboxStatus::Sent).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_id, "E1");
    }
}
