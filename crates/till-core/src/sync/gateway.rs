//! Remote upsert gateway: routes queue entries onto remote table calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::models::SyncAction;

/// Result of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote call was made and accepted.
    Applied,
    /// The entry type is unknown; no remote call was made.
    Dropped,
}

/// Remote operation an action maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Upsert,
    Delete,
}

/// Fixed route table: action type to remote table and operation.
pub fn route(action: SyncAction) -> (&'static str, RemoteOp) {
    let op = if action.is_delete() {
        RemoteOp::Delete
    } else {
        RemoteOp::Upsert
    };
    (action.collection().table_name(), op)
}

#[derive(Clone)]
pub struct UpsertGateway {
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl UpsertGateway {
    pub fn new(remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Push one queue entry. Every remote call is bounded by the gateway
    /// timeout; running out of time is an ordinary failure.
    pub async fn try_push(&self, action_type: &str, payload: &Value) -> RemoteResult<PushOutcome> {
        let Some(action) = SyncAction::parse(action_type) else {
            tracing::warn!("Dropping sync queue entry with unknown type {action_type}");
            return Ok(PushOutcome::Dropped);
        };

        let (table, op) = route(action);
        let call = async {
            match op {
                RemoteOp::Upsert => self.remote.upsert(table, payload).await,
                RemoteOp::Delete => {
                    let id = payload.get("id").and_then(Value::as_str).ok_or_else(|| {
                        RemoteError::InvalidPayload(format!("{action} payload has no string id"))
                    })?;
                    self.remote.delete(table, id).await
                }
            }
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(())) => {
                tracing::debug!("Pushed {action} to {table}");
                Ok(PushOutcome::Applied)
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(RemoteError::Timeout(self.timeout)),
        }
    }

    /// `true` when the entry was applied or dropped; `false` on any failure.
    pub async fn push(&self, action_type: &str, payload: &Value) -> bool {
        match self.try_push(action_type, payload).await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!("Push of {action_type} failed: {error}");
                false
            }
        }
    }
}
