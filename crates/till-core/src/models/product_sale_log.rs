//! Per-line sale log and legacy duplicate collapsing

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, Sale, SaleItem, SyncAction, Syncable};
use crate::util::parse_iso;

/// Denormalized record of one product line of a completed sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSaleLog {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub product_name: String,
    #[serde(default)]
    pub size: Option<String>,
    pub quantity: i64,
    pub price_at_sale: f64,
    pub cost_at_sale: f64,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Deterministic log id for a sale line.
#[must_use]
pub fn sale_log_id(sale_id: &str, product_id: &str) -> String {
    format!("{sale_id}-{product_id}")
}

impl ProductSaleLog {
    #[must_use]
    pub fn for_line(sale: &Sale, item: &SaleItem) -> Self {
        Self {
            id: sale_log_id(&sale.id, &item.product_id),
            sale_id: sale.id.clone(),
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            size: item.size.clone(),
            quantity: item.quantity,
            price_at_sale: item.price_at_sale,
            cost_at_sale: item.cost_at_sale,
            timestamp: sale.created_at.clone(),
            version: None,
            updated_at: None,
        }
    }

    /// `(saleId, productId)`; the logical identity of the log.
    #[must_use]
    pub fn natural_key(&self) -> (String, String) {
        (self.sale_id.clone(), self.product_id.clone())
    }

    fn has_canonical_id(&self) -> bool {
        self.id == sale_log_id(&self.sale_id, &self.product_id)
    }
}

/// Result of [`collapse_duplicates`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollapsedLogs {
    pub kept: Vec<ProductSaleLog>,
    pub removed_ids: Vec<String>,
}

/// Keep one log per `(saleId, productId)`.
///
/// The survivor has the latest `timestamp`; ties go to the record carrying
/// the deterministic id, then to the greater id.
#[must_use]
pub fn collapse_duplicates(records: Vec<ProductSaleLog>) -> CollapsedLogs {
    let mut groups: BTreeMap<(String, String), Vec<ProductSaleLog>> = BTreeMap::new();
    for record in records {
        groups.entry(record.natural_key()).or_default().push(record);
    }

    let mut collapsed = CollapsedLogs::default();
    for (_, mut group) in groups {
        group.sort_by(|a, b| {
            let a_time = parse_iso(&a.timestamp);
            let b_time = parse_iso(&b.timestamp);
            b_time
                .cmp(&a_time)
                .then_with(|| b.has_canonical_id().cmp(&a.has_canonical_id()))
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut group = group.into_iter();
        if let Some(survivor) = group.next() {
            collapsed.kept.push(survivor);
        }
        collapsed.removed_ids.extend(group.map(|duplicate| duplicate.id));
    }

    collapsed
}

impl_versioned!(ProductSaleLog);

impl Syncable for ProductSaleLog {
    const COLLECTION: Collection = Collection::ProductSaleLogs;
    const UPSERT_ACTION: SyncAction = SyncAction::ProductSaleLog;

    fn id(&self) -> &str {
        &self.id
    }

    fn collapse(records: Vec<Self>) -> (Vec<Self>, Vec<String>) {
        let collapsed = collapse_duplicates(records);
        (collapsed.kept, collapsed.removed_ids)
    }
}
