//! Operator management of dead-lettered queue entries.

use serde::Serialize;

use super::gateway::UpsertGateway;
use crate::db::DeadLetterRepository;
use crate::error::{Error, Result};
use crate::models::FailedSyncQueueItem;
use crate::services::DatabaseService;

/// Outcome of retrying every dead-lettered entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryAllReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Dead-letter queue operations. Entries only leave through an operator
/// retry that succeeds or an explicit delete.
#[derive(Clone)]
pub struct DeadLetterQueue {
    db: DatabaseService,
    gateway: UpsertGateway,
}

impl DeadLetterQueue {
    pub const fn new(db: DatabaseService, gateway: UpsertGateway) -> Self {
        Self { db, gateway }
    }

    pub async fn list(&self) -> Result<Vec<FailedSyncQueueItem>> {
        let db = self.db.lock().await;
        DeadLetterRepository::new(db.connection()).list().await
    }

    pub async fn count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        DeadLetterRepository::new(db.connection()).count().await
    }

    /// Push one entry directly through the gateway.
    ///
    /// Returns `true` and removes the entry on success. On failure the entry
    /// stays with the new error recorded and `false` is returned.
    pub async fn retry_one(&self, id: i64) -> Result<bool> {
        let item = {
            let db = self.db.lock().await;
            let repo = DeadLetterRepository::new(db.connection());
            repo.get(id).await?
        };
        let item = item.ok_or_else(|| Error::NotFound(format!("dead-letter entry {id}")))?;

        self.retry_item(&item).await
    }

    /// Retry every entry independently.
    pub async fn retry_all(&self) -> Result<RetryAllReport> {
        let items = self.list().await?;
        let mut report = RetryAllReport::default();

        for item in &items {
            match self.retry_item(item).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(error) => {
                    tracing::error!("Could not update dead-letter entry {}: {error}", item.id);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Retried dead-letter queue"
        );
        Ok(report)
    }

    pub async fn delete_one(&self, id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        DeadLetterRepository::new(db.connection()).delete(id).await
    }

    pub async fn delete_all(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let removed = DeadLetterRepository::new(db.connection())
            .delete_all()
            .await?;
        tracing::info!("Cleared {removed} dead-letter entries");
        Ok(removed)
    }

    async fn retry_item(&self, item: &FailedSyncQueueItem) -> Result<bool> {
        let result = self
            .gateway
            .try_push(&item.action_type, &item.payload)
            .await;

        let db = self.db.lock().await;
        let repo = DeadLetterRepository::new(db.connection());
        match result {
            Ok(_) => {
                repo.delete(item.id).await?;
                tracing::info!("Dead-letter entry {} ({}) synced", item.id, item.action_type);
                Ok(true)
            }
            Err(error) => {
                repo.record_failure(item.id, &error.to_string()).await?;
                tracing::warn!("Retry of dead-letter entry {} failed: {error}", item.id);
                Ok(false)
            }
        }
    }
}
