use till_core::models::{Sale, SaleRequest};

use crate::commands::common::{
    format_money, open_service, open_session, parse_sale_line, print_json, resolve_id, short_id,
    Context,
};
use crate::error::CliError;

pub async fn run_sale_new(
    ctx: &Context,
    items: &[String],
    sale_id: Option<String>,
    payment: &str,
) -> Result<(), CliError> {
    let mut lines = items
        .iter()
        .map(|raw| parse_sale_line(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let service = open_session(ctx).await?;
    let products = service.products().await;
    for line in &mut lines {
        line.product_id = resolve_id(
            &line.product_id,
            products.iter().map(|p| p.id.as_str()),
            "product",
        )?;
    }

    let mut request = SaleRequest::new(lines);
    request.payment_method = payment.to_string();
    request.sale_id = sale_id;

    let sale = service.process_sale(request).await?;
    println!("Sale {}", sale.id);
    for item in &sale.items {
        println!(
            "  {} x{} @ {} = {}",
            item.product_name,
            item.quantity,
            format_money(item.price_at_sale),
            format_money(item.line_total())
        );
    }
    println!("Total {}", format_money(sale.total_amount));
    Ok(())
}

pub async fn run_sale_list(ctx: &Context, limit: usize, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let sales = recent_sales(service.sales().await, limit);

    if as_json {
        return print_json(&sales);
    }
    if sales.is_empty() {
        println!("No sales recorded.");
        return Ok(());
    }
    for line in format_sale_lines(&sales) {
        println!("{line}");
    }
    Ok(())
}

/// Newest first, at most `limit`.
pub fn recent_sales(mut sales: Vec<Sale>, limit: usize) -> Vec<Sale> {
    sales.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sales.truncate(limit);
    sales
}

pub fn format_sale_lines(sales: &[Sale]) -> Vec<String> {
    sales
        .iter()
        .map(|sale| {
            let status = if sale.is_voided() { "VOIDED" } else { "" };
            format!(
                "{:<13}  {}  {:>3} lines  total {:>9}  {}  {status}",
                short_id(&sale.id),
                sale.created_at,
                sale.items.len(),
                format_money(sale.total_amount),
                sale.payment_method
            )
            .trim_end()
            .to_string()
        })
        .collect()
}
