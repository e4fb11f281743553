//! Background scheduler.
//!
//! Owns the long-running loops: promoting due scheduled notifications,
//! expiring stale ones, and driving the matching, geofence, and reminder
//! sweeps. Each loop is a `tokio::select!` over its interval and a shared
//! shutdown signal; the per-tick work lives in standalone functions so the
//! tests can drive a single tick without time travel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::NotificationDispatcher;
use crate::error::CoreError;
use crate::geofence::GeofenceEngine;
use crate::matching::MatchingEngine;
use crate::metrics::AppMetrics;
use crate::reminder::ReminderEngine;
use crate::repository::Repository;
use crate::types::NotificationStatus;

/// How many due notifications one promotion tick picks up.
const PROMOTE_BATCH_LIMIT: i64 = 100;

/// Tick intervals for the background loops.
#[derive(Debug, Clone)]
pub struct SchedulerIntervals {
    pub promote: Duration,
    pub expire: Duration,
    pub matching: Duration,
    pub geofence: Duration,
    pub reminder: Duration,
}

impl Default for SchedulerIntervals {
    fn default() -> Self {
        Self {
            promote: Duration::from_secs(60),
            expire: Duration::from_secs(3600),
            matching: Duration::from_secs(900),
            geofence: Duration::from_secs(900),
            reminder: Duration::from_secs(3600),
        }
    }
}

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct EngineScheduler {
    repo: Arc<Repository>,
    dispatcher: Arc<NotificationDispatcher>,
    matching: Arc<MatchingEngine>,
    geofence: Arc<GeofenceEngine>,
    reminder: Arc<ReminderEngine>,
    metrics: AppMetrics,
    intervals: SchedulerIntervals,
    running: Mutex<Option<RunningTasks>>,
}

impl EngineScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        dispatcher: Arc<NotificationDispatcher>,
        matching: Arc<MatchingEngine>,
        geofence: Arc<GeofenceEngine>,
        reminder: Arc<ReminderEngine>,
        metrics: AppMetrics,
        intervals: SchedulerIntervals,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            matching,
            geofence,
            reminder,
            metrics,
            intervals,
            running: Mutex::new(None),
        }
    }

    /// Start every loop. Idempotent: a second call on a running scheduler
    /// does nothing and returns `false`.
    pub async fn start(&self) -> Result<bool, CoreError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("scheduler already running; start ignored");
            return Ok(false);
        }

        self.geofence.hydrate().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        {
            let repo = Arc::clone(&self.repo);
            let dispatcher = Arc::clone(&self.dispatcher);
            let metrics = self.metrics.clone();
            let mut shutdown = shutdown_rx.clone();
            let every = self.intervals.promote;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) =
                                promote_scheduled_once(&repo, &dispatcher, &metrics).await
                            {
                                error!(error = %err, "promotion tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let repo = Arc::clone(&self.repo);
            let dispatcher = Arc::clone(&self.dispatcher);
            let metrics = self.metrics.clone();
            let mut shutdown = shutdown_rx.clone();
            let every = self.intervals.expire;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) = expire_once(&repo, &metrics).await {
                                error!(error = %err, "expiry tick failed");
                            }
                            dispatcher.purge_unread_cache().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let matching = Arc::clone(&self.matching);
            let mut shutdown = shutdown_rx.clone();
            let every = self.intervals.matching;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) = matching.run_automatic_matching().await {
                                error!(error = %err, "matching tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let geofence = Arc::clone(&self.geofence);
            let mut shutdown = shutdown_rx.clone();
            let every = self.intervals.geofence;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) = geofence.tick_once().await {
                                error!(error = %err, "geofence tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let reminder = Arc::clone(&self.reminder);
            let mut shutdown = shutdown_rx;
            let every = self.intervals.reminder;
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(err) = reminder.tick_once().await {
                                error!(error = %err, "reminder tick failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        info!(loops = tasks.len(), "scheduler started");
        *running = Some(RunningTasks { shutdown: shutdown_tx, tasks });
        Ok(true)
    }

    /// Stop every loop and wait for it to wind down. Idempotent.
    pub async fn stop(&self) {
        let Some(RunningTasks { shutdown, tasks }) = self.running.lock().await.take() else {
            return;
        };
        let _ = shutdown.send(true);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler loop ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

/// Promote due scheduled notifications: evaluate preferences at dispatch
/// time and fan out. Returns the number promoted.
pub async fn promote_scheduled_once(
    repo: &Repository,
    dispatcher: &NotificationDispatcher,
    metrics: &AppMetrics,
) -> Result<usize, CoreError> {
    let due = repo.due_scheduled(Utc::now(), PROMOTE_BATCH_LIMIT).await?;
    let mut promoted = 0;

    for notification in due {
        repo.set_notification_status(notification.id, NotificationStatus::Pending)
            .await?;
        match dispatcher.dispatch_record(&notification).await {
            Ok(_) => {
                metrics.scheduled_promoted.inc();
                promoted += 1;
            }
            Err(err) => {
                warn!(
                    notification_id = notification.id,
                    error = %err,
                    "promotion dispatch failed"
                );
                if let Err(err) = repo
                    .set_notification_status(notification.id, NotificationStatus::Failed)
                    .await
                {
                    error!(notification_id = notification.id, error = %err,
                        "failed to mark promoted notification as failed");
                }
            }
        }
    }

    if promoted > 0 {
        debug!(promoted, "scheduled notifications promoted");
    }
    Ok(promoted)
}

/// Delete never-sent notifications whose expiry has passed.
pub async fn expire_once(repo: &Repository, metrics: &AppMetrics) -> Result<u64, CoreError> {
    let deleted = repo.delete_expired(Utc::now()).await?;
    if deleted > 0 {
        metrics.notifications_expired.inc_by(deleted);
        debug!(deleted, "expired notifications removed");
    }
    Ok(deleted)
}
