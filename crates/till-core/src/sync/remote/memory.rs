//! In-process remote store with failure and latency injection.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteStore};

/// One call observed by [`InMemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upsert { table: String, id: String },
    Delete { table: String, id: String },
    Fetch { table: String, offset: usize, limit: usize },
}

impl RemoteCall {
    pub const fn is_write(&self) -> bool {
        matches!(self, Self::Upsert { .. } | Self::Delete { .. })
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<RemoteCall>,
    offline: bool,
    failing_writes: u32,
    latency: Option<Duration>,
}

/// Remote store held in memory. Clones share the same tables, so several
/// simulated devices can sync against one "server".
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemoteStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert rows directly, bypassing the call log.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut inner = self.inner();
        let entries = inner.tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_str) {
                entries.insert(id.to_string(), row);
            }
        }
    }

    /// Rows of `table` ordered by id.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.inner()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id).cloned())
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner().calls.clone()
    }

    /// Number of upsert and delete calls received.
    pub fn write_count(&self) -> usize {
        self.inner().calls.iter().filter(|call| call.is_write()).count()
    }

    pub fn clear_calls(&self) {
        self.inner().calls.clear();
    }

    /// When offline every call fails with [`RemoteError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }

    /// Fail the next `count` upsert/delete calls with an API error.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner().failing_writes = count;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner().latency = latency;
    }

    async fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let latency = {
            let mut inner = self.inner();
            inner.calls.push(call);
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner().offline {
            return Err(RemoteError::Unavailable("remote is offline".to_string()));
        }
        Ok(())
    }

    fn take_write_failure(&self) -> RemoteResult<()> {
        let mut inner = self.inner();
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(RemoteError::Api("injected failure (500)".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(&self, table: &str, row: &Value) -> RemoteResult<()> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::InvalidPayload(format!("{table} row has no string id")))?
            .to_string();

        self.begin(RemoteCall::Upsert {
            table: table.to_string(),
            id: id.clone(),
        })
        .await?;
        self.take_write_failure()?;

        self.inner()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row.clone());
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()> {
        self.begin(RemoteCall::Delete {
            table: table.to_string(),
            id: id.to_string(),
        })
        .await?;
        self.take_write_failure()?;

        if let Some(rows) = self.inner().tables.get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        table: &str,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Vec<Value>> {
        self.begin(RemoteCall::Fetch {
            table: table.to_string(),
            offset,
            limit,
        })
        .await?;

        Ok(self
            .inner()
            .tables
            .get(table)
            .map(|rows| rows.values().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_replaces_by_id_and_pages_in_order() {
        let remote = InMemoryRemoteStore::new();
        remote.upsert("products", &json!({ "id": "b", "n": 1 })).await.unwrap();
        remote.upsert("products", &json!({ "id": "a", "n": 1 })).await.unwrap();
        remote.upsert("products", &json!({ "id": "b", "n": 2 })).await.unwrap();

        let first = remote.fetch_page("products", 0, 1).await.unwrap();
        assert_eq!(first, vec![json!({ "id": "a", "n": 1 })]);
        let second = remote.fetch_page("products", 1, 1).await.unwrap();
        assert_eq!(second, vec![json!({ "id": "b", "n": 2 })]);
        assert!(remote.fetch_page("products", 2, 1).await.unwrap().is_empty());
        assert_eq!(remote.write_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_injected_failures_are_consumed() {
        let remote = InMemoryRemoteStore::new();
        remote.fail_next_writes(1);

        assert!(remote.upsert("sales", &json!({ "id": "S1" })).await.is_err());
        assert!(remote.row("sales", "S1").is_none());
        remote.upsert("sales", &json!({ "id": "S1" })).await.unwrap();
        assert!(remote.row("sales", "S1").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_rejects_every_call() {
        let remote = InMemoryRemoteStore::new();
        remote.seed("users", [json!({ "id": "u1" })]);
        remote.set_offline(true);

        assert!(matches!(
            remote.fetch_page("users", 0, 10).await,
            Err(RemoteError::Unavailable(_))
        ));
        assert!(remote.delete("users", "u1").await.is_err());
        assert_eq!(remote.rows("users").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_requires_id() {
        let remote = InMemoryRemoteStore::new();
        assert!(matches!(
            remote.upsert("sales", &json!({ "total": 1 })).await,
            Err(RemoteError::InvalidPayload(_))
        ));
        assert!(remote.calls().is_empty());
    }
}
