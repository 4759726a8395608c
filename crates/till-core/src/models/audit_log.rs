//! Audit log model

use serde::{Deserialize, Serialize};

use super::{Collection, SyncAction, Syncable, Versioned};
use crate::util::{generate_id, now_iso};

/// Append-only record of a committed domain mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub details: String,
    pub timestamp: String,
}

impl AuditLog {
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        actor_id: Option<String>,
        entity_id: Option<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            action: action.into(),
            actor_id,
            entity_id,
            details: details.into(),
            timestamp: now_iso(),
        }
    }
}

// Audit entries are never edited, so the timestamp alone orders copies.
impl Versioned for AuditLog {
    fn version(&self) -> Option<u64> {
        None
    }

    fn updated_at(&self) -> Option<&str> {
        Some(&self.timestamp)
    }

    fn touch(&mut self) {}
}

impl Syncable for AuditLog {
    const COLLECTION: Collection = Collection::AuditLogs;
    const UPSERT_ACTION: SyncAction = SyncAction::AuditLog;

    fn id(&self) -> &str {
        &self.id
    }
}
