//! Cancellable periodic task.
//!
//! [`spawn_periodic`] runs an async closure every `interval`, starting after
//! `initial_delay`, until [`PeriodicHandle::cancel`] is called. Cancelling
//! stops future ticks only; a tick that is already running completes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Shortest period a task can tick at.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How consecutive ticks relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    /// Each tick runs on its own task. A slow tick never delays the next one.
    Detached,
    /// Each tick is awaited before the next is scheduled, so ticks never
    /// overlap.
    Sequential,
}

/// Handle to a task started by [`spawn_periodic`].
///
/// Dropping the handle has the same effect as [`PeriodicHandle::cancel`].
#[derive(Debug)]
pub struct PeriodicHandle {
    name: String,
    cancelled: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl PeriodicHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop scheduling further ticks. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
            debug!(task = %self.name, "periodic task cancelled");
        }
    }

    /// True while the task is neither cancelled nor finished.
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

/// Run `f` every `interval`, the first time after `initial_delay`.
///
/// Missed ticks are delayed rather than fired in a burst. An `interval` below
/// one millisecond is raised to one millisecond. Must be called from within a
/// tokio runtime.
pub fn spawn_periodic<F, Fut>(
    name: impl Into<String>,
    initial_delay: Duration,
    interval: Duration,
    mode: TickMode,
    f: F,
) -> PeriodicHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let name = name.into();
    let interval = interval.max(MIN_INTERVAL);
    let cancelled = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    let task_name = name.clone();
    let task_cancelled = cancelled.clone();
    let task = tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if task_cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    trace!(task = %task_name, "tick");
                    match mode {
                        TickMode::Detached => {
                            tokio::spawn(f());
                        }
                        TickMode::Sequential => f().await,
                    }
                }
            }
        }
    });

    PeriodicHandle {
        name,
        cancelled,
        shutdown_tx,
        task,
    }
}
