//! Background processor draining the sync queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::gateway::{PushOutcome, UpsertGateway};
use super::remote::RemoteResult;
use crate::config::SyncConfig;
use crate::db::{DeadLetterRepository, SyncQueueRepository};
use crate::error::Result;
use crate::models::SyncQueueItem;
use crate::services::DatabaseService;
use crate::state::{SyncState, SyncStatus};
use crate::util::now_millis;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassOutcome {
    #[default]
    Completed,
    /// Another pass held the single-flight guard.
    Skipped,
}

/// Counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub outcome: PassOutcome,
    pub attempted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub dropped_unknown: usize,
}

impl PassReport {
    const fn skipped() -> Self {
        Self {
            outcome: PassOutcome::Skipped,
            attempted: 0,
            succeeded: 0,
            retried: 0,
            dead_lettered: 0,
            dropped_unknown: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.retried + self.dead_lettered
    }
}

/// What happened to an entry whose push failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureOutcome {
    Retried,
    DeadLettered,
    /// The entry left the queue while its push was in flight.
    Gone,
}

/// Holds the single-flight flag for the duration of one pass.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncProcessor {
    db: DatabaseService,
    gateway: UpsertGateway,
    interval: Duration,
    max_retries: u32,
    running: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl SyncProcessor {
    pub fn new(db: DatabaseService, gateway: UpsertGateway, config: &SyncConfig) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            db,
            gateway,
            interval: config.interval,
            max_retries: config.max_retries,
            running: AtomicBool::new(false),
            status,
        }
    }

    pub fn gateway(&self) -> &UpsertGateway {
        &self.gateway
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified whenever the status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drain the queue once.
    ///
    /// Returns a `Skipped` report without touching the queue when another
    /// pass is in progress. Every entry is pushed concurrently; the queue is
    /// updated as results come back.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let Some(_guard) = PassGuard::acquire(&self.running) else {
            tracing::debug!("Sync pass already running; skipping tick");
            return Ok(PassReport::skipped());
        };

        let items = {
            let db = self.db.lock().await;
            let queue = SyncQueueRepository::new(db.connection());
            queue.list().await?
        };

        let mut report = PassReport {
            attempted: items.len(),
            ..PassReport::default()
        };
        if items.is_empty() {
            self.finish_pass(&report, None).await?;
            return Ok(report);
        }

        self.status
            .send_modify(|status| status.state = SyncState::Syncing);
        tracing::debug!("Sync pass pushing {} queued entries", items.len());

        let mut pushes = JoinSet::new();
        for item in items {
            let gateway = self.gateway.clone();
            pushes.spawn(async move {
                let result = gateway.try_push(&item.action_type, &item.payload).await;
                (item, result)
            });
        }

        let mut last_error = None;
        while let Some(joined) = pushes.join_next().await {
            let (item, result): (SyncQueueItem, RemoteResult<PushOutcome>) = match joined {
                Ok(pair) => pair,
                Err(error) => {
                    tracing::error!("Sync push task failed: {error}");
                    continue;
                }
            };

            let db = self.db.lock().await;
            let conn = db.connection();
            match result {
                Ok(outcome) => {
                    SyncQueueRepository::new(conn).delete(item.key).await?;
                    if outcome == PushOutcome::Dropped {
                        report.dropped_unknown += 1;
                    } else {
                        report.succeeded += 1;
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    match self.record_failure(conn, item.key, &message).await? {
                        FailureOutcome::Retried => report.retried += 1,
                        FailureOutcome::DeadLettered => {
                            tracing::warn!(
                                "Dead-lettered {} entry {} after {} attempts: {message}",
                                item.action_type,
                                item.key,
                                self.max_retries
                            );
                            report.dead_lettered += 1;
                        }
                        FailureOutcome::Gone => {}
                    }
                    last_error = Some(message);
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            dropped = report.dropped_unknown,
            "Sync pass finished"
        );
        self.finish_pass(&report, last_error).await?;
        Ok(report)
    }

    /// Bump the retry count of a failed entry, dead-lettering it at the
    /// ceiling. One transaction covers the read, the dead-letter insert and
    /// the delete.
    async fn record_failure(
        &self,
        conn: &Connection,
        key: i64,
        error: &str,
    ) -> Result<FailureOutcome> {
        let tx = conn.transaction().await?;
        match self.record_failure_in(&tx, key, error).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(error) => {
                tx.rollback().await.ok();
                Err(error)
            }
        }
    }

    async fn record_failure_in(
        &self,
        conn: &Connection,
        key: i64,
        error: &str,
    ) -> Result<FailureOutcome> {
        let queue = SyncQueueRepository::new(conn);
        let Some(mut item) = queue.get(key).await? else {
            return Ok(FailureOutcome::Gone);
        };

        item.retry_count += 1;
        if item.retry_count < self.max_retries {
            queue.set_retry_count(key, item.retry_count).await?;
            return Ok(FailureOutcome::Retried);
        }

        DeadLetterRepository::new(conn).insert(&item, error).await?;
        queue.delete(key).await?;
        Ok(FailureOutcome::DeadLettered)
    }

    async fn finish_pass(&self, report: &PassReport, last_error: Option<String>) -> Result<()> {
        let (pending, dead_letters) = {
            let db = self.db.lock().await;
            let conn = db.connection();
            let pending = SyncQueueRepository::new(conn).count().await?;
            let dead_letters = DeadLetterRepository::new(conn).count().await?;
            (pending, dead_letters)
        };

        self.status.send_modify(|status| {
            status.pending = pending;
            status.dead_letters = dead_letters;
            status.last_pass_at = Some(now_millis());
            status.state = if report.failed() > 0 {
                SyncState::Error
            } else {
                SyncState::Synced
            };
            status.last_error = last_error;
        });
        Ok(())
    }

    fn set_offline(&self) {
        self.status
            .send_modify(|status| status.state = SyncState::Offline);
    }

    async fn run_logged_pass(&self) {
        if let Err(error) = self.run_pass().await {
            tracing::error!("Sync pass failed: {error}");
            self.status.send_modify(|status| {
                status.state = SyncState::Error;
                status.last_error = Some(error.to_string());
            });
        }
    }

    /// Run the processor until `shutdown` is cancelled.
    ///
    /// Passes run on every interval tick while `online` reads `true`, and
    /// once immediately when it flips from `false` to `true`.
    pub async fn run(
        self: Arc<Self>,
        mut online: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Sync processor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut was_online = *online.borrow_and_update();
        if !was_online {
            self.set_offline();
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("Sync processor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    if was_online {
                        self.run_logged_pass().await;
                    }
                }

                changed = online.changed() => {
                    if changed.is_err() {
                        tracing::info!("Connectivity channel closed, sync processor stopping");
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    if is_online && !was_online {
                        tracing::info!("Connectivity restored; draining sync queue");
                        was_online = true;
                        self.run_logged_pass().await;
                    } else if !is_online && was_online {
                        tracing::info!("Connectivity lost; pausing sync");
                        was_online = false;
                        self.set_offline();
                    }
                }
            }
        }

        tracing::info!("Sync processor stopped");
    }
}
