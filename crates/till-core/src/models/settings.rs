//! Business settings model

use serde::{Deserialize, Serialize};

use super::entity::impl_versioned;
use super::{Collection, SyncAction, Syncable};

/// Business-wide settings, stored as a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSettings {
    pub id: String,
    /// Name printed on receipts
    pub business_name: String,
    /// ISO 4217 currency code
    pub currency: String,
    /// Tax rate as a fraction (0.16 = 16%)
    pub tax_rate: f64,
    /// Footer line printed on receipts
    #[serde(default)]
    pub receipt_footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl BusinessSettings {
    /// Fixed id of the settings record.
    pub const ID: &'static str = "business-settings";
}

impl Default for BusinessSettings {
    fn default() -> Self {
        Self {
            id: Self::ID.to_string(),
            business_name: "My Shop".to_string(),
            currency: "USD".to_string(),
            tax_rate: 0.0,
            receipt_footer: None,
            version: None,
            updated_at: None,
        }
    }
}

impl_versioned!(BusinessSettings);

impl Syncable for BusinessSettings {
    const COLLECTION: Collection = Collection::BusinessSettings;
    const UPSERT_ACTION: SyncAction = SyncAction::BusinessSettings;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = BusinessSettings::default();
        assert_eq!(settings.id, BusinessSettings::ID);
        assert_eq!(settings.currency, "USD");
        assert_eq!(settings.version, None);
    }
}
