//! Product model

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};
use crate::util::{generate_id, now_iso};

/// A product on sale, with its running stock count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    pub price: f64,
    /// Unit cost used for profit reporting; must be positive before a sale.
    #[serde(default)]
    pub cost_price: f64,
    pub stock: i64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Fields supplied when creating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
    pub price: f64,
    pub cost_price: f64,
    pub stock: i64,
    #[serde(default)]
    pub category: Option<String>,
}

impl Product {
    /// Build a new product from a draft. Version starts unset; the first
    /// `touch` makes it 1.
    #[must_use]
    pub fn from_draft(draft: ProductDraft) -> Self {
        Self {
            id: generate_id(),
            name: draft.name,
            size: draft.size,
            price: draft.price,
            cost_price: draft.cost_price,
            stock: draft.stock,
            category: draft.category,
            created_at: Some(now_iso()),
            version: None,
            updated_at: None,
        }
    }

    /// Name with size suffix, as printed on receipts.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self.size.as_deref() {
            Some(size) if !size.trim().is_empty() => format!("{} ({})", self.name, size.trim()),
            _ => self.name.clone(),
        }
    }
}

impl_versioned!(Product);

impl Syncable for Product {
    const COLLECTION: Collection = Collection::Products;
    const UPSERT_ACTION: SyncAction = SyncAction::Product;

    fn id(&self) -> &str {
        &self.id
    }
}
