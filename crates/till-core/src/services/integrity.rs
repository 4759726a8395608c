//! Consistency check between sales and product sale logs.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::models::{ProductSaleLog, Sale};

/// A sale line whose log count is not exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogIssue {
    pub sale_id: String,
    pub product_id: String,
    /// Logs found for the line
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub sales_checked: usize,
    pub lines_checked: usize,
    pub missing: Vec<LogIssue>,
    pub duplicates: Vec<LogIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.duplicates.is_empty()
    }
}

/// Every line of a non-voided sale should have exactly one log.
///
/// Voided sales are skipped since approving a void deletes their logs.
pub fn check_integrity(sales: &[Sale], logs: &[ProductSaleLog]) -> IntegrityReport {
    let mut counts: HashMap<(&str, &str), usize> = HashMap::new();
    for log in logs {
        *counts
            .entry((log.sale_id.as_str(), log.product_id.as_str()))
            .or_default() += 1;
    }

    let mut report = IntegrityReport::default();
    for sale in sales.iter().filter(|sale| !sale.is_voided()) {
        report.sales_checked += 1;

        let products: BTreeSet<&str> = sale
            .items
            .iter()
            .map(|item| item.product_id.as_str())
            .collect();
        for product_id in products {
            report.lines_checked += 1;
            let count = counts
                .get(&(sale.id.as_str(), product_id))
                .copied()
                .unwrap_or(0);
            let issue = || LogIssue {
                sale_id: sale.id.clone(),
                product_id: product_id.to_string(),
                count,
            };
            match count {
                0 => report.missing.push(issue()),
                1 => {}
                _ => report.duplicates.push(issue()),
            }
        }
    }

    if !report.is_clean() {
        tracing::warn!(
            missing = report.missing.len(),
            duplicates = report.duplicates.len(),
            "Sale log integrity check found issues"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{SaleItem, SaleStatus};

    fn sale(id: &str, products: &[&str], status: SaleStatus) -> Sale {
        Sale {
            id: id.to_string(),
            items: products
                .iter()
                .map(|product_id| SaleItem {
                    product_id: (*product_id).to_string(),
                    product_name: "Cola".to_string(),
                    size: None,
                    quantity: 1,
                    price_at_sale: 2.0,
                    cost_at_sale: 1.0,
                })
                .collect(),
            total_amount: 2.0,
            total_cost: 1.0,
            payment_method: "CASH".to_string(),
            cashier_id: None,
            shift_id: None,
            status,
            created_at: "2024-01-01T10:00:00.000Z".to_string(),
            voided_at: None,
            version: Some(1),
            updated_at: None,
        }
    }

    fn logs_for(sale: &Sale) -> Vec<ProductSaleLog> {
        sale.items
            .iter()
            .map(|item| ProductSaleLog::for_line(sale, item))
            .collect()
    }

    #[test]
    fn test_clean_sales_report_nothing() {
        let sales = vec![sale("S1", &["P1", "P2"], SaleStatus::Completed)];
        let logs = logs_for(&sales[0]);

        let report = check_integrity(&sales, &logs);
        assert!(report.is_clean());
        assert_eq!(report.sales_checked, 1);
        assert_eq!(report.lines_checked, 2);
    }

    #[test]
    fn test_missing_and_duplicate_logs() {
        let sales = vec![
            sale("S1", &["P1", "P2"], SaleStatus::Completed),
            sale("S2", &["P1"], SaleStatus::Completed),
        ];
        let mut logs = logs_for(&sales[0]);
        logs.retain(|log| log.product_id == "P1");
        let mut duplicate = logs_for(&sales[1]);
        let mut copy = duplicate[0].clone();
        copy.id = "legacy-id".to_string();
        duplicate.push(copy);
        logs.extend(duplicate);

        let report = check_integrity(&sales, &logs);
        assert_eq!(
            report.missing,
            vec![LogIssue {
                sale_id: "S1".to_string(),
                product_id: "P2".to_string(),
                count: 0,
            }]
        );
        assert_eq!(
            report.duplicates,
            vec![LogIssue {
                sale_id: "S2".to_string(),
                product_id: "P1".to_string(),
                count: 2,
            }]
        );
    }

    #[test]
    fn test_voided_sales_are_skipped() {
        let sales = vec![sale("S1", &["P1"], SaleStatus::Voided)];
        let report = check_integrity(&sales, &[]);
        assert!(report.is_clean());
        assert_eq!(report.sales_checked, 0);
    }
}
