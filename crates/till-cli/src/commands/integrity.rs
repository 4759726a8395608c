use till_core::services::IntegrityReport;

use crate::commands::common::{open_service, print_json, short_id, Context};
use crate::error::CliError;

pub async fn run_integrity(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let report = service.check_integrity().await?;

    if as_json {
        return print_json(&report);
    }
    for line in format_integrity_lines(&report) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_integrity_lines(report: &IntegrityReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Checked {} sales ({} lines)",
        report.sales_checked, report.lines_checked
    )];
    if report.is_clean() {
        lines.push("Every sale line has exactly one product sale log.".to_string());
        return lines;
    }

    lines.extend(report.missing.iter().map(|issue| {
        format!(
            "missing    sale={} product={}",
            short_id(&issue.sale_id),
            issue.product_id
        )
    }));
    lines.extend(report.duplicates.iter().map(|issue| {
        format!(
            "duplicate  sale={} product={} logs={}",
            short_id(&issue.sale_id),
            issue.product_id,
            issue.count
        )
    }));
    lines
}
