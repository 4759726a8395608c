//! Cashier shift model

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub user_id: String,
    pub opened_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    pub opening_cash: f64,
    #[serde(default)]
    pub closing_cash: Option<f64>,
    #[serde(default)]
    pub status: ShiftStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Shift {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

impl_versioned!(Shift);

impl Syncable for Shift {
    const COLLECTION: Collection = Collection::Shifts;
    const UPSERT_ACTION: SyncAction = SyncAction::Shift;

    fn id(&self) -> &str {
        &self.id
    }
}
