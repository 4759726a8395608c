//! Two-phase maker/checker requests: sale voids and stock adjustments.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Request to void a completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoidRequest {
    pub id: String,
    pub sale_id: String,
    pub reason: String,
    pub requested_by: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Request to adjust a product's stock by a signed quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChangeRequest {
    pub id: String,
    pub product_id: String,
    pub quantity_change: i64,
    pub reason: String,
    pub requested_by: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl_versioned!(VoidRequest, StockChangeRequest);

impl Syncable for VoidRequest {
    const COLLECTION: Collection = Collection::VoidRequests;
    const UPSERT_ACTION: SyncAction = SyncAction::VoidRequest;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Syncable for StockChangeRequest {
    const COLLECTION: Collection = Collection::StockChangeRequests;
    const UPSERT_ACTION: SyncAction = SyncAction::StockChangeRequest;

    fn id(&self) -> &str {
        &self.id
    }
}
