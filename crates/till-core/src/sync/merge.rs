//! Merge and reconciliation of local and remote collections.
//!
//! Remote rows seed the merged map; local rows that are strictly newer (or
//! missing remotely) replace them and are queued for upload. Every losing
//! copy that differed from the winner is kept in the conflict log.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use libsql::Connection;
use serde::Serialize;

use super::remote::{RemoteResult, RemoteStore};
use crate::config::SyncConfig;
use crate::db::{CollectionStore, ConflictRepository, SyncQueueRepository};
use crate::error::Result;
use crate::models::{
    is_newer, AuditLog, BusinessSettings, Collection, ConflictWinner, Product, ProductSaleLog,
    Sale, Shift, StockChangeRequest, SyncAction, SyncConflict, Syncable, User, VoidRequest,
    VERSION_LWW_STRATEGY,
};
use crate::services::DatabaseService;
use crate::util::now_millis;

/// Two differing copies of one entity and the one that survived.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict<T> {
    pub winner: ConflictWinner,
    pub kept: T,
    pub discarded: T,
}

impl<T: Syncable> Conflict<T> {
    fn to_record(&self) -> Result<SyncConflict> {
        let (local_version, remote_version) = match self.winner {
            ConflictWinner::Local => (self.kept.version(), self.discarded.version()),
            ConflictWinner::Remote => (self.discarded.version(), self.kept.version()),
        };
        Ok(SyncConflict {
            id: 0,
            collection: T::COLLECTION.table_name().to_string(),
            entity_id: self.kept.id().to_string(),
            winner: self.winner,
            local_version,
            remote_version,
            discarded_payload: serde_json::to_value(&self.discarded)?,
            resolved_at: now_millis(),
            strategy: VERSION_LWW_STRATEGY.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<T> {
    /// Unified records ordered by id
    pub merged: Vec<T>,
    /// Local records that must be uploaded
    pub requeue: Vec<T>,
    pub conflicts: Vec<Conflict<T>>,
}

/// Combine the remote and local copies of one collection.
pub fn merge_records<T: Syncable>(remote: Vec<T>, local: Vec<T>) -> MergeOutcome<T> {
    let mut merged: BTreeMap<String, T> = remote
        .into_iter()
        .map(|record| (record.id().to_string(), record))
        .collect();
    let mut requeue = Vec::new();
    let mut conflicts = Vec::new();

    for local_record in local {
        let id = local_record.id().to_string();
        let Some(remote_record) = merged.remove(&id) else {
            requeue.push(local_record.clone());
            merged.insert(id, local_record);
            continue;
        };

        if remote_record == local_record {
            merged.insert(id, remote_record);
        } else if is_newer(&local_record, &remote_record) {
            requeue.push(local_record.clone());
            merged.insert(id, local_record.clone());
            conflicts.push(Conflict {
                winner: ConflictWinner::Local,
                kept: local_record,
                discarded: remote_record,
            });
        } else {
            merged.insert(id, remote_record.clone());
            conflicts.push(Conflict {
                winner: ConflictWinner::Remote,
                kept: remote_record,
                discarded: local_record,
            });
        }
    }

    MergeOutcome {
        merged: merged.into_values().collect(),
        requeue,
        conflicts,
    }
}

/// Per-collection reconciliation counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub collection: Collection,
    /// `false` when the remote could not be read and only local data loaded
    pub remote_available: bool,
    pub remote_rows: usize,
    pub local_rows: usize,
    pub merged: usize,
    pub requeued: usize,
    pub conflicts: usize,
    pub duplicates_removed: usize,
    /// Stale queued upserts dropped because the remote copy won
    pub pruned: usize,
}

impl CollectionReport {
    const fn new(collection: Collection) -> Self {
        Self {
            collection,
            remote_available: false,
            remote_rows: 0,
            local_rows: 0,
            merged: 0,
            requeued: 0,
            conflicts: 0,
            duplicates_removed: 0,
            pruned: 0,
        }
    }
}

impl fmt::Display for CollectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.remote_available {
            return write!(
                f,
                "{}: remote unavailable, {} local rows loaded",
                self.collection, self.local_rows
            );
        }
        write!(
            f,
            "{}: {} remote, {} local, {} merged, {} requeued, {} conflicts, {} duplicates removed",
            self.collection,
            self.remote_rows,
            self.local_rows,
            self.merged,
            self.requeued,
            self.conflicts,
            self.duplicates_removed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub collections: Vec<CollectionReport>,
}

impl ReconcileReport {
    pub fn remote_available(&self) -> bool {
        self.collections.iter().all(|report| report.remote_available)
    }

    pub fn requeued(&self) -> usize {
        self.collections.iter().map(|report| report.requeued).sum()
    }

    pub fn conflicts(&self) -> usize {
        self.collections.iter().map(|report| report.conflicts).sum()
    }

    pub fn duplicates_removed(&self) -> usize {
        self.collections
            .iter()
            .map(|report| report.duplicates_removed)
            .sum()
    }

    pub fn get(&self, collection: Collection) -> Option<&CollectionReport> {
        self.collections
            .iter()
            .find(|report| report.collection == collection)
    }
}

/// Runs the merge against the local store and a remote.
#[derive(Clone)]
pub struct Reconciler {
    db: DatabaseService,
    remote: Arc<dyn RemoteStore>,
    page_size: usize,
}

impl Reconciler {
    pub fn new(db: DatabaseService, remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self {
            db,
            remote,
            page_size: config.page_size.max(1),
        }
    }

    /// Reconcile every collection. Safe to run repeatedly.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for collection in Collection::ALL {
            let collection_report = match collection {
                Collection::Products => self.reconcile::<Product>().await?,
                Collection::Users => self.reconcile::<User>().await?,
                Collection::Sales => self.reconcile::<Sale>().await?,
                Collection::Shifts => self.reconcile::<Shift>().await?,
                Collection::AuditLogs => self.reconcile::<AuditLog>().await?,
                Collection::VoidRequests => self.reconcile::<VoidRequest>().await?,
                Collection::StockChangeRequests => self.reconcile::<StockChangeRequest>().await?,
                Collection::ProductSaleLogs => self.reconcile::<ProductSaleLog>().await?,
                Collection::BusinessSettings => self.reconcile::<BusinessSettings>().await?,
            };
            tracing::debug!("{collection_report}");
            report.collections.push(collection_report);
        }

        tracing::info!(
            requeued = report.requeued(),
            conflicts = report.conflicts(),
            duplicates = report.duplicates_removed(),
            remote_available = report.remote_available(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    /// Reconcile one collection.
    pub async fn reconcile<T: Syncable>(&self) -> Result<CollectionReport> {
        let mut report = CollectionReport::new(T::COLLECTION);
        let remote = match self.fetch_remote::<T>().await {
            Ok(rows) => Some(rows),
            Err(error) => {
                tracing::warn!(
                    "Remote fetch of {} failed, using local data only: {error}",
                    T::COLLECTION
                );
                None
            }
        };

        let db = self.db.lock().await;
        let conn = db.connection();
        let local: Vec<T> = CollectionStore::new(conn).get_all().await?;
        report.local_rows = local.len();

        let Some(remote) = remote else {
            return Ok(report);
        };
        report.remote_available = true;
        report.remote_rows = remote.len();

        let tx = conn.transaction().await?;
        match Self::merge_into(&tx, remote, local, &mut report).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(report)
            }
            Err(error) => {
                tx.rollback().await.ok();
                Err(error)
            }
        }
    }

    async fn fetch_remote<T: Syncable>(&self) -> RemoteResult<Vec<T>> {
        let table = T::COLLECTION.table_name();
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.remote.fetch_page(table, offset, self.page_size).await?;
            let page_len = page.len();
            for row in page {
                match serde_json::from_value::<T>(row) {
                    Ok(record) => records.push(record),
                    Err(error) => tracing::warn!("Skipping unreadable {table} row: {error}"),
                }
            }
            if page_len < self.page_size {
                break;
            }
            offset += page_len;
        }

        Ok(records)
    }

    async fn merge_into<T: Syncable>(
        conn: &Connection,
        mut remote: Vec<T>,
        local: Vec<T>,
        report: &mut CollectionReport,
    ) -> Result<()> {
        let queue = SyncQueueRepository::new(conn);
        let store = CollectionStore::new(conn);
        let upsert_action = T::UPSERT_ACTION.as_str();

        // A delete still waiting in the queue must not be undone by the
        // remote copy it is about to remove.
        if let Some(delete_action) = delete_action_for(T::COLLECTION) {
            let pending_deletes = queue.pending_ids(delete_action.as_str()).await?;
            remote.retain(|record| !pending_deletes.contains(record.id()));
        }

        let outcome = merge_records(remote, local);
        let (kept, removed_ids) = T::collapse(outcome.merged);
        let removed: HashSet<&str> = removed_ids.iter().map(String::as_str).collect();

        for record in &kept {
            store.put(record).await?;
        }
        for id in &removed_ids {
            store.delete(T::COLLECTION, id).await?;
            queue.delete_upserts(upsert_action, id).await?;
        }

        for record in outcome.requeue.iter().filter(|r| !removed.contains(r.id())) {
            if !queue.has_pending(upsert_action, record.id()).await? {
                queue.enqueue_action(T::UPSERT_ACTION, record).await?;
                report.requeued += 1;
            }
        }

        let conflicts = ConflictRepository::new(conn);
        for conflict in &outcome.conflicts {
            if conflict.winner == ConflictWinner::Remote {
                let pruned = queue.delete_upserts(upsert_action, conflict.kept.id()).await?;
                report.pruned += usize::try_from(pruned).unwrap_or_default();
            }
            conflicts.insert(&conflict.to_record()?).await?;
        }

        report.merged = kept.len();
        report.conflicts = outcome.conflicts.len();
        report.duplicates_removed = removed_ids.len();
        Ok(())
    }
}

fn delete_action_for(collection: Collection) -> Option<SyncAction> {
    SyncAction::ALL
        .into_iter()
        .find(|action| action.is_delete() && action.collection() == collection)
}
