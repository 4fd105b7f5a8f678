use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::QueueConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::models::{QueueItem, QueueStats, QueueStatus};
use crate::queue::{QueueError, QueueStore};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_limit: usize,
    pub pacing: Duration,
    pub cleanup_interval: Duration,
    pub retention: Duration,
}

impl From<&QueueConfig> for WorkerSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_limit: config.batch_limit,
            pacing: config.pacing,
            cleanup_interval: config.cleanup_interval,
            retention: config.retention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub is_running: bool,
    pub is_processing: bool,
    pub interval_ms: Option<u64>,
    pub queue_stats: QueueStats,
}

/// Timers armed by `start`; dropped by `stop`.
struct Schedule {
    interval: Duration,
    shutdown: watch::Sender<bool>,
    ticker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Single-flight queue worker.
///
/// Construct once, share behind an `Arc`, and hand it to whatever exposes
/// the control surface. At most one pass runs at a time regardless of
/// whether it was started by the timer or a manual trigger.
pub struct Worker {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: WorkerSettings,
    processing: AtomicBool,
    schedule: Mutex<Option<Schedule>>,
}

/// Clears the processing flag on every exit path.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Worker {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            dispatcher,
            settings,
            processing: AtomicBool::new(false),
            schedule: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.lock_schedule().is_some()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> WorkerState {
        if self.is_processing() {
            WorkerState::Running
        } else if self.is_running() {
            WorkerState::Idle
        } else {
            WorkerState::Stopped
        }
    }

    /// Arm the processing and cleanup timers. The first pass runs
    /// immediately. Returns false without touching anything if already started.
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let mut schedule = self.lock_schedule();
        if schedule.is_some() {
            return false;
        }

        let interval = interval.max(Duration::from_millis(1));
        let (shutdown, _) = watch::channel(false);

        let ticker = tokio::spawn(Arc::clone(self).run_ticker(interval, shutdown.subscribe()));
        let sweeper = tokio::spawn(Arc::clone(self).run_sweeper(shutdown.subscribe()));

        *schedule = Some(Schedule {
            interval,
            shutdown,
            ticker,
            sweeper,
        });

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            batch_limit = self.settings.batch_limit,
            "Queue worker started"
        );
        true
    }

    /// Cancel future timer firings. A pass already in flight runs to completion.
    pub fn stop(&self) -> bool {
        let Some(schedule) = self.lock_schedule().take() else {
            return false;
        };

        let _ = schedule.shutdown.send(true);
        drop(schedule.ticker);
        drop(schedule.sweeper);

        tracing::info!("Queue worker stopped");
        true
    }

    /// Stop, then start again with a new interval.
    pub fn restart(self: &Arc<Self>, interval: Duration) {
        self.stop();
        self.start(interval);
    }

    pub async fn trigger_manual_processing(&self) -> Result<PassReport, QueueError> {
        self.process_pass().await
    }

    pub async fn status(&self) -> Result<WorkerStatus, QueueError> {
        let queue_stats = self.store.stats().await?;
        let interval_ms = self
            .lock_schedule()
            .as_ref()
            .map(|s| u64::try_from(s.interval.as_millis()).unwrap_or(u64::MAX));

        Ok(WorkerStatus {
            state: self.state(),
            is_running: interval_ms.is_some(),
            is_processing: self.is_processing(),
            interval_ms,
            queue_stats,
        })
    }

    /// Run one pass over due items. Returns zero counts when another pass
    /// already holds the guard.
    pub async fn process_pass(&self) -> Result<PassReport, QueueError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Queue pass already in progress, skipping");
            return Ok(PassReport::default());
        }
        let _guard = PassGuard(&self.processing);

        let items = self.store.claim_due(self.settings.batch_limit).await?;
        let mut report = PassReport::default();

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                time::sleep(self.settings.pacing).await;
            }

            match self.store.mark_sending(item.id).await {
                Ok(()) => {}
                Err(e @ (QueueError::NotFound(_) | QueueError::InvalidTransition { .. })) => {
                    tracing::warn!("Skipping queue item {}: {e}", item.id);
                    continue;
                }
                Err(e) => return Err(e),
            }

            report.processed += 1;
            match self.deliver(item).await {
                None => {
                    if let Err(e) = self.store.mark_sent(item.id).await {
                        self.release(item, &e).await;
                        return Err(e);
                    }
                    report.succeeded += 1;
                    tracing::debug!(
                        "Delivered queue item {} (attempt {})",
                        item.id,
                        item.attempts + 1
                    );
                }
                Some(reason) => {
                    let status = match self.store.mark_failed(item.id, &reason).await {
                        Ok(status) => status,
                        Err(e) => {
                            self.release(item, &e).await;
                            return Err(e);
                        }
                    };
                    report.failed += 1;
                    if status == QueueStatus::Dead {
                        tracing::warn!(
                            "Queue item {} dead-lettered after {} attempts: {reason}",
                            item.id,
                            item.max_attempts
                        );
                    } else {
                        tracing::warn!(
                            "Queue item {} failed (attempt {}/{}): {reason}",
                            item.id,
                            item.attempts + 1,
                            item.max_attempts
                        );
                    }
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                "Queue pass finished"
            );
        }

        Ok(report)
    }

    /// Attempt delivery of one item. Returns the failure reason, if any.
    /// Dispatcher errors and panics count as failures of this item only.
    async fn deliver(&self, item: &QueueItem) -> Option<String> {
        let attempt = AssertUnwindSafe(self.dispatcher.attempt(&item.payload)).catch_unwind();

        match attempt.await {
            Ok(Ok(DispatchOutcome::Delivered)) => None,
            Ok(Ok(DispatchOutcome::Failed(reason))) => Some(reason),
            Ok(Err(e)) => Some(e.message),
            Err(panic) => Some(panic_message(panic.as_ref())),
        }
    }

    /// Move a claimed item out of `sending` when its outcome could not be
    /// recorded, so a later pass picks it up again.
    async fn release(&self, item: &QueueItem, cause: &QueueError) {
        let reason = format!("Failed to record delivery outcome: {cause}");
        match self.store.mark_failed(item.id, &reason).await {
            Ok(status) => {
                tracing::warn!("Queue item {} released as {status}: {cause}", item.id);
            }
            Err(e) => tracing::error!("Queue item {} left in sending: {e}", item.id),
        }
    }

    async fn run_ticker(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.process_pass().await {
                tracing::error!("Queue pass failed: {e}");
            }
        }

        tracing::debug!("Queue ticker stopped");
    }

    async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.cleanup_interval.max(Duration::from_millis(1));
        let mut sweeper = time::interval_at(Instant::now() + period, period);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sweeper.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.store.cleanup(self.settings.retention).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Queue cleanup removed {removed} items"),
                Err(e) => tracing::error!("Queue cleanup failed: {e}"),
            }
        }

        tracing::debug!("Queue sweeper stopped");
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<Schedule>> {
        self.schedule.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("Dispatcher panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("Dispatcher panicked: {msg}")
    } else {
        "Dispatcher panicked".to_string()
    }
}
