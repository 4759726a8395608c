//! Sync queue and dead-letter queue repositories

use std::collections::HashSet;

use libsql::{params, Connection, Row};
use serde_json::Value;

use crate::error::Result;
use crate::models::{FailedSyncQueueItem, SyncAction, SyncQueueItem};
use crate::util::now_millis;

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

/// Live outbound queue.
pub struct SyncQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append an entry. Run against an open transaction so the entry commits
    /// or rolls back together with the domain write that produced it.
    pub async fn enqueue(&self, action_type: &str, payload: &Value) -> Result<i64> {
        let payload = serde_json::to_string(payload)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue (action_type, payload, timestamp, retry_count)
                 VALUES (?, ?, ?, 0)",
                params![action_type, payload, now_millis()],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Serialize an entity and enqueue it under a known action.
    pub async fn enqueue_action<T: serde::Serialize>(
        &self,
        action: SyncAction,
        payload: &T,
    ) -> Result<i64> {
        let payload = serde_json::to_value(payload)?;
        self.enqueue(action.as_str(), &payload).await
    }

    /// Enqueue a delete-by-id for `action`.
    pub async fn enqueue_delete(&self, action: SyncAction, id: &str) -> Result<i64> {
        self.enqueue(action.as_str(), &serde_json::json!({ "id": id }))
            .await
    }

    pub async fn get(&self, key: i64) -> Result<Option<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, action_type, payload, timestamp, retry_count
                 FROM sync_queue WHERE key = ?",
                [key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    /// All pending entries in enqueue order.
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, action_type, payload, timestamp, retry_count
                 FROM sync_queue ORDER BY key",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    pub async fn set_retry_count(&self, key: i64, retry_count: u32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET retry_count = ? WHERE key = ?",
                params![i64::from(retry_count), key],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE key = ?", [key])
            .await?;
        Ok(removed > 0)
    }

    /// Drop queued upserts of `action_type` for one entity.
    ///
    /// Used after a merge where the remote copy won, so an older local snapshot
    /// is not pushed back over it.
    pub async fn delete_upserts(&self, action_type: &str, entity_id: &str) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM sync_queue
                 WHERE action_type = ? AND json_extract(payload, '$.id') = ?",
                params![action_type, entity_id],
            )
            .await?)
    }

    /// Whether an entry of `action_type` is queued for `entity_id`.
    pub async fn has_pending(&self, action_type: &str, entity_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sync_queue
                    WHERE action_type = ? AND json_extract(payload, '$.id') = ?
                 )",
                params![action_type, entity_id],
            )
            .await?;
        Ok(match rows.next().await? {
            Some(row) => row.get::<i64>(0)? != 0,
            None => false,
        })
    }

    /// Entity ids with a queued entry of `action_type`.
    pub async fn pending_ids(&self, action_type: &str) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT json_extract(payload, '$.id') FROM sync_queue
                 WHERE action_type = ? AND json_extract(payload, '$.id') IS NOT NULL",
                [action_type],
            )
            .await?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await? {
            ids.insert(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    pub async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn parse_item(row: &Row) -> Result<SyncQueueItem> {
        let payload: String = row.get(2)?;
        Ok(SyncQueueItem {
            key: row.get(0)?,
            action_type: row.get(1)?,
            payload: serde_json::from_str(&payload)?,
            timestamp: row.get(3)?,
            retry_count: to_u32(row.get::<i64>(4)?),
        })
    }
}

/// Entries that exhausted their retries and wait for an operator.
pub struct DeadLetterRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DeadLetterRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Store a dead-lettered copy of `item`. Returns the new row id.
    pub async fn insert(&self, item: &SyncQueueItem, last_error: &str) -> Result<i64> {
        let payload = serde_json::to_string(&item.payload)?;
        self.conn
            .execute(
                "INSERT INTO failed_sync_queue (
                    original_key, action_type, payload, timestamp, retry_count,
                    failed_at, total_retries, can_retry, last_error
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)",
                params![
                    item.key,
                    item.action_type.as_str(),
                    payload,
                    item.timestamp,
                    i64::from(item.retry_count),
                    now_millis(),
                    i64::from(item.retry_count),
                    last_error
                ],
            )
            .await?;
        Ok(self.conn.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<FailedSyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, original_key, action_type, payload, timestamp, retry_count,
                        failed_at, total_retries, can_retry, last_error
                 FROM failed_sync_queue WHERE id = ?",
                [id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    /// All dead-lettered entries, most recent failure first.
    pub async fn list(&self) -> Result<Vec<FailedSyncQueueItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, original_key, action_type, payload, timestamp, retry_count,
                        failed_at, total_retries, can_retry, last_error
                 FROM failed_sync_queue ORDER BY failed_at DESC, id DESC",
                (),
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    /// Record a failed operator retry.
    pub async fn record_failure(&self, id: i64, last_error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE failed_sync_queue
                 SET last_error = ?, total_retries = total_retries + 1
                 WHERE id = ?",
                params![last_error, id],
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM failed_sync_queue WHERE id = ?", [id])
            .await?;
        Ok(removed > 0)
    }

    /// Remove every entry; returns how many were removed.
    pub async fn delete_all(&self) -> Result<u64> {
        Ok(self
            .conn
            .execute("DELETE FROM failed_sync_queue", ())
            .await?)
    }

    pub async fn count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM failed_sync_queue", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn parse_item(row: &Row) -> Result<FailedSyncQueueItem> {
        let payload: String = row.get(3)?;
        Ok(FailedSyncQueueItem {
            id: row.get(0)?,
            original_key: row.get(1)?,
            action_type: row.get(2)?,
            payload: serde_json::from_str(&payload)?,
            timestamp: row.get(4)?,
            retry_count: to_u32(row.get::<i64>(5)?),
            failed_at: row.get(6)?,
            total_retries: to_u32(row.get::<i64>(7)?),
            can_retry: row.get::<i64>(8)? != 0,
            last_error: row.get(9)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_assigns_increasing_keys() {
        let db = setup().await;
        let queue = SyncQueueRepository::new(db.connection());

        let first = queue.enqueue("SALE", &json!({ "id": "S1" })).await.unwrap();
        let second = queue.enqueue("SALE", &json!({ "id": "S2" })).await.unwrap();
        assert!(second > first);

        let items = queue.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, first);
        assert_eq!(items[0].retry_count, 0);
        assert_eq!(items[1].entity_id(), Some("S2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_count_update_and_delete() {
        let db = setup().await;
        let queue = SyncQueueRepository::new(db.connection());

        let key = queue.enqueue("PRODUCT", &json!({ "id": "P1" })).await.unwrap();
        queue.set_retry_count(key, 3).await.unwrap();
        assert_eq!(queue.get(key).await.unwrap().unwrap().retry_count, 3);

        assert!(queue.delete(key).await.unwrap());
        assert!(queue.get(key).await.unwrap().is_none());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_upserts_only_matches_entity_and_type() {
        let db = setup().await;
        let queue = SyncQueueRepository::new(db.connection());

        queue.enqueue("PRODUCT", &json!({ "id": "P1" })).await.unwrap();
        queue.enqueue("PRODUCT", &json!({ "id": "P1" })).await.unwrap();
        queue.enqueue("PRODUCT", &json!({ "id": "P2" })).await.unwrap();
        queue
            .enqueue_delete(SyncAction::DeleteProduct, "P1")
            .await
            .unwrap();

        assert!(queue.has_pending("DELETE_PRODUCT", "P1").await.unwrap());
        assert_eq!(
            queue.pending_ids("PRODUCT").await.unwrap(),
            HashSet::from(["P1".to_string(), "P2".to_string()])
        );

        assert_eq!(queue.delete_upserts("PRODUCT", "P1").await.unwrap(), 2);
        assert!(!queue.has_pending("PRODUCT", "P1").await.unwrap());

        let remaining = queue.list().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].entity_id(), Some("P2"));
        assert_eq!(remaining[1].action_type, "DELETE_PRODUCT");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_rolls_back_with_transaction() {
        let db = setup().await;

        let tx = db.connection().transaction().await.unwrap();
        SyncQueueRepository::new(&tx)
            .enqueue("SALE", &json!({ "id": "S1" }))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let queue = SyncQueueRepository::new(db.connection());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dead_letter_lifecycle() {
        let db = setup().await;
        let queue = SyncQueueRepository::new(db.connection());
        let dead_letters = DeadLetterRepository::new(db.connection());

        let key = queue.enqueue("SALE", &json!({ "id": "S1" })).await.unwrap();
        let mut item = queue.get(key).await.unwrap().unwrap();
        item.retry_count = 5;

        let id = dead_letters.insert(&item, "HTTP 500").await.unwrap();
        let stored = dead_letters.get(id).await.unwrap().unwrap();
        assert_eq!(stored.original_key, key);
        assert_eq!(stored.total_retries, 5);
        assert!(stored.can_retry);
        assert_eq!(stored.last_error, "HTTP 500");

        dead_letters.record_failure(id, "HTTP 502").await.unwrap();
        let stored = dead_letters.get(id).await.unwrap().unwrap();
        assert_eq!(stored.total_retries, 6);
        assert_eq!(stored.last_error, "HTTP 502");

        dead_letters.insert(&item, "again").await.unwrap();
        assert_eq!(dead_letters.list().await.unwrap().len(), 2);
        assert_eq!(dead_letters.delete_all().await.unwrap(), 2);
        assert_eq!(dead_letters.count().await.unwrap(), 0);
    }
}
