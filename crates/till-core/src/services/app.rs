//! Application lifecycle: reconcile, load state, run the sync processor.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::database::DatabaseService;
use super::till::TillService;
use crate::config::SyncConfig;
use crate::db::ConflictRepository;
use crate::error::Result;
use crate::models::SyncConflict;
use crate::state::SyncStatus;
use crate::sync::{
    DeadLetterQueue, PassReport, ReconcileReport, Reconciler, RemoteStore, SyncProcessor,
    UpsertGateway,
};

/// A running till: domain service plus the background sync machinery.
///
/// Built by [`TillApp::init`] and shut down by [`TillApp::teardown`].
pub struct TillApp {
    service: TillService,
    reconciler: Reconciler,
    processor: Arc<SyncProcessor>,
    dead_letters: DeadLetterQueue,
    online: watch::Sender<bool>,
    shutdown: CancellationToken,
    worker: JoinHandle<()>,
}

impl TillApp {
    /// Reconcile every collection, load the in-memory state and start the
    /// processor loop.
    pub async fn init(
        db: DatabaseService,
        remote: Arc<dyn RemoteStore>,
        config: &SyncConfig,
    ) -> Result<Self> {
        let reconciler = Reconciler::new(db.clone(), Arc::clone(&remote), config);
        let report = reconciler.reconcile_all().await?;
        if !report.remote_available() {
            tracing::warn!("Remote unavailable during startup; using local data");
        }

        let service = TillService::open(db.clone()).await?;

        let gateway = UpsertGateway::new(remote, config.push_timeout);
        let processor = Arc::new(SyncProcessor::new(db.clone(), gateway.clone(), config));
        let dead_letters = DeadLetterQueue::new(db, gateway);

        let (online, online_rx) = watch::channel(config.start_online);
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(Arc::clone(&processor).run(online_rx, shutdown.clone()));

        tracing::info!(
            requeued = report.requeued(),
            conflicts = report.conflicts(),
            "Till initialized"
        );
        Ok(Self {
            service,
            reconciler,
            processor,
            dead_letters,
            online,
            shutdown,
            worker,
        })
    }

    pub fn service(&self) -> &TillService {
        &self.service
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    pub fn processor(&self) -> &SyncProcessor {
        &self.processor
    }

    /// Feed the connectivity signal. Going online triggers an immediate pass.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn status(&self) -> SyncStatus {
        self.processor.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.processor.subscribe()
    }

    /// Drain the queue once, outside the schedule.
    pub async fn run_sync_now(&self) -> Result<PassReport> {
        self.processor.run_pass().await
    }

    /// Re-run reconciliation and refresh the in-memory state.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let report = self.reconciler.reconcile_all().await?;
        self.service.reload().await?;
        Ok(report)
    }

    /// Most recent merge conflicts.
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.service.database().lock().await;
        ConflictRepository::new(db.connection()).list(limit).await
    }

    /// Log out, stop the processor and drop the in-memory state.
    pub async fn teardown(self) {
        self.service.logout().await;
        self.shutdown.cancel();
        if let Err(error) = self.worker.await {
            tracing::error!("Sync processor task failed: {error}");
        }
        self.service.clear().await;
        tracing::info!("Till shut down");
    }
}
