//! Sale model

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    #[default]
    Completed,
    Voided,
}

/// One line of a sale. Name and size are snapshots so the line survives the
/// product being deleted later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: String,
    pub product_name: String,
    #[serde(default)]
    pub size: Option<String>,
    pub quantity: i64,
    pub price_at_sale: f64,
    pub cost_at_sale: f64,
}

impl SaleItem {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn line_total(&self) -> f64 {
        self.price_at_sale * self.quantity as f64
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn line_cost(&self) -> f64 {
        self.cost_at_sale * self.quantity as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub items: Vec<SaleItem>,
    pub total_amount: f64,
    pub total_cost: f64,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub cashier_id: Option<String>,
    #[serde(default)]
    pub shift_id: Option<String>,
    #[serde(default)]
    pub status: SaleStatus,
    pub created_at: String,
    #[serde(default)]
    pub voided_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Sale {
    #[must_use]
    pub fn is_voided(&self) -> bool {
        self.status == SaleStatus::Voided
    }
}

/// A line requested at the till, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleLineInput {
    pub product_id: String,
    pub quantity: i64,
    /// Falls back to the product's current price when absent.
    #[serde(default)]
    pub price_at_sale: Option<f64>,
    /// Falls back to the product's cost price when absent.
    #[serde(default)]
    pub cost_at_sale: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    /// Client-chosen sale id. Replaying a request with the id of an already
    /// recorded sale returns that sale without writing anything.
    #[serde(default)]
    pub sale_id: Option<String>,
    pub items: Vec<SaleLineInput>,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
}

fn default_payment_method() -> String {
    "CASH".to_string()
}

impl SaleRequest {
    #[must_use]
    pub fn new(items: Vec<SaleLineInput>) -> Self {
        Self {
            sale_id: None,
            items,
            payment_method: default_payment_method(),
        }
    }

    #[must_use]
    pub fn with_sale_id(mut self, sale_id: impl Into<String>) -> Self {
        self.sale_id = Some(sale_id.into());
        self
    }
}

impl_versioned!(Sale);

impl Syncable for Sale {
    const COLLECTION: Collection = Collection::Sales;
    const UPSERT_ACTION: SyncAction = SyncAction::Sale;

    fn id(&self) -> &str {
        &self.id
    }
}
