//! Sync conflict model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which copy survived a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "local" {
            Self::Local
        } else {
            Self::Remote
        }
    }
}

impl fmt::Display for ConflictWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Recorded merge conflict, keeping the snapshot that lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Conflict row identifier (0 until stored)
    pub id: i64,
    /// Collection the entity belongs to
    pub collection: String,
    /// Entity involved in the conflict
    pub entity_id: String,
    pub winner: ConflictWinner,
    pub local_version: Option<u64>,
    pub remote_version: Option<u64>,
    /// Snapshot that was discarded
    pub discarded_payload: Value,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}

/// Strategy name recorded for version/timestamp resolution.
pub const VERSION_LWW_STRATEGY: &str = "version-lww";
