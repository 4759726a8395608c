//! Outbound sync queue and dead-letter models

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Collection;

/// Queue entries carry their type as a plain string so that rows written by
/// another app version still load; this enum covers the types this version
/// knows how to push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Product,
    DeleteProduct,
    User,
    DeleteUser,
    Sale,
    Shift,
    AuditLog,
    VoidRequest,
    StockChangeRequest,
    ProductSaleLog,
    DeleteProductSaleLog,
    BusinessSettings,
}

impl SyncAction {
    pub const ALL: [Self; 12] = [
        Self::Product,
        Self::DeleteProduct,
        Self::User,
        Self::DeleteUser,
        Self::Sale,
        Self::Shift,
        Self::AuditLog,
        Self::VoidRequest,
        Self::StockChangeRequest,
        Self::ProductSaleLog,
        Self::DeleteProductSaleLog,
        Self::BusinessSettings,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Product => "PRODUCT",
            Self::DeleteProduct => "DELETE_PRODUCT",
            Self::User => "USER",
            Self::DeleteUser => "DELETE_USER",
            Self::Sale => "SALE",
            Self::Shift => "SHIFT",
            Self::AuditLog => "AUDIT_LOG",
            Self::VoidRequest => "VOID_REQUEST",
            Self::StockChangeRequest => "STOCK_CHANGE_REQUEST",
            Self::ProductSaleLog => "PRODUCT_SALE_LOG",
            Self::DeleteProductSaleLog => "DELETE_PRODUCT_SALE_LOG",
            Self::BusinessSettings => "BUSINESS_SETTINGS",
        }
    }

    /// Look up a queue type string; `None` for types this version does not know.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.as_str() == value)
    }

    /// Collection whose remote table this action writes to.
    #[must_use]
    pub const fn collection(self) -> Collection {
        match self {
            Self::Product | Self::DeleteProduct => Collection::Products,
            Self::User | Self::DeleteUser => Collection::Users,
            Self::Sale => Collection::Sales,
            Self::Shift => Collection::Shifts,
            Self::AuditLog => Collection::AuditLogs,
            Self::VoidRequest => Collection::VoidRequests,
            Self::StockChangeRequest => Collection::StockChangeRequests,
            Self::ProductSaleLog | Self::DeleteProductSaleLog => Collection::ProductSaleLogs,
            Self::BusinessSettings => Collection::BusinessSettings,
        }
    }

    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(
            self,
            Self::DeleteProduct | Self::DeleteUser | Self::DeleteProductSaleLog
        )
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A pending outbound operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
    /// Local auto-increment key; never synced.
    pub key: i64,
    #[serde(rename = "type")]
    pub action_type: String,
    pub payload: Value,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
}

impl SyncQueueItem {
    /// The `id` field of the payload snapshot, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}

/// A queue entry that exhausted its automatic retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSyncQueueItem {
    /// Dead-letter row id
    pub id: i64,
    /// Key the entry had in the live queue
    pub original_key: i64,
    #[serde(rename = "type")]
    pub action_type: String,
    pub payload: Value,
    pub timestamp: i64,
    pub retry_count: u32,
    /// When the entry was dead-lettered (Unix ms)
    pub failed_at: i64,
    pub total_retries: u32,
    pub can_retry: bool,
    pub last_error: String,
}

impl FailedSyncQueueItem {
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("id").and_then(Value::as_str)
    }
}
