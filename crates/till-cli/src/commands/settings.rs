use till_core::models::BusinessSettings;

use crate::commands::common::{open_service, open_session, print_json, Context};
use crate::error::CliError;

pub struct SettingsChanges {
    pub business_name: Option<String>,
    pub currency: Option<String>,
    pub tax_rate: Option<f64>,
    pub receipt_footer: Option<String>,
}

impl SettingsChanges {
    /// Apply the given fields; `None` when nothing was given.
    pub fn apply(self, mut settings: BusinessSettings) -> Option<BusinessSettings> {
        if self.business_name.is_none()
            && self.currency.is_none()
            && self.tax_rate.is_none()
            && self.receipt_footer.is_none()
        {
            return None;
        }

        if let Some(name) = self.business_name {
            settings.business_name = name;
        }
        if let Some(currency) = self.currency {
            settings.currency = currency;
        }
        if let Some(tax_rate) = self.tax_rate {
            settings.tax_rate = tax_rate;
        }
        if self.receipt_footer.is_some() {
            settings.receipt_footer = self.receipt_footer;
        }
        Some(settings)
    }
}

pub async fn run_settings_show(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let settings = service.settings().await;

    if as_json {
        return print_json(&settings);
    }
    println!("Business: {}", settings.business_name);
    println!("Currency: {}", settings.currency);
    println!("Tax rate: {}%", settings.tax_rate * 100.0);
    if let Some(footer) = &settings.receipt_footer {
        println!("Footer:   {footer}");
    }
    Ok(())
}

pub async fn run_settings_set(ctx: &Context, changes: SettingsChanges) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let settings = changes
        .apply(service.settings().await)
        .ok_or(CliError::NothingToChange)?;

    let saved = service.update_settings(settings).await?;
    println!(
        "Saved settings for {} (version {})",
        saved.business_name,
        saved.version.unwrap_or(0)
    );
    Ok(())
}
