use till_core::models::{StockChangeRequest, VoidRequest};

use crate::commands::common::{
    open_service, open_session, preview, print_json, resolve_id, short_id, Context,
};
use crate::error::CliError;

pub async fn run_void_request(ctx: &Context, sale_id: &str, reason: &str) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let sales = service.sales().await;
    let sale_id = resolve_id(sale_id, sales.iter().map(|s| s.id.as_str()), "sale")?;

    let request = service.request_void(&sale_id, reason).await?;
    println!("Void request {} for sale {} is pending", request.id, sale_id);
    Ok(())
}

pub async fn run_void_resolve(ctx: &Context, id: &str, approve: bool) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let requests = service.void_requests().await;
    let request_id = resolve_id(id, requests.iter().map(|r| r.id.as_str()), "void request")?;

    let request = service.resolve_void(&request_id, approve).await?;
    println!("Void request {} {}", request.id, request.status);
    Ok(())
}

pub async fn run_void_list(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let requests = service.void_requests().await;

    if as_json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No void requests.");
        return Ok(());
    }
    for line in format_void_lines(&requests) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_stock_request(
    ctx: &Context,
    product_id: &str,
    change: i64,
    reason: &str,
) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let products = service.products().await;
    let product_id = resolve_id(product_id, products.iter().map(|p| p.id.as_str()), "product")?;

    let request = service
        .request_stock_change(&product_id, change, reason)
        .await?;
    println!(
        "Stock change {} ({change:+}) for product {} is pending",
        request.id, product_id
    );
    Ok(())
}

pub async fn run_stock_resolve(ctx: &Context, id: &str, approve: bool) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let requests = service.stock_change_requests().await;
    let request_id = resolve_id(id, requests.iter().map(|r| r.id.as_str()), "stock change")?;

    let request = service.resolve_stock_change(&request_id, approve).await?;
    println!("Stock change {} {}", request.id, request.status);
    if approve {
        if let Some(product) = service.product(&request.product_id).await {
            println!("{} stock is now {}", product.display_name(), product.stock);
        }
    }
    Ok(())
}

pub async fn run_stock_list(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let requests = service.stock_change_requests().await;

    if as_json {
        return print_json(&requests);
    }
    if requests.is_empty() {
        println!("No stock change requests.");
        return Ok(());
    }
    for line in format_stock_lines(&requests) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_void_lines(requests: &[VoidRequest]) -> Vec<String> {
    requests
        .iter()
        .map(|request| {
            format!(
                "{:<13}  {:<8}  sale={}  {}",
                short_id(&request.id),
                request.status,
                short_id(&request.sale_id),
                preview(&request.reason, 40)
            )
        })
        .collect()
}

pub fn format_stock_lines(requests: &[StockChangeRequest]) -> Vec<String> {
    requests
        .iter()
        .map(|request| {
            format!(
                "{:<13}  {:<8}  product={}  {:+}  {}",
                short_id(&request.id),
                request.status,
                short_id(&request.product_id),
                request.quantity_change,
                preview(&request.reason, 40)
            )
        })
        .collect()
}
