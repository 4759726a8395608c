use till_core::models::{Product, ProductDraft};

use crate::commands::common::{
    format_money, open_session, open_service, print_json, resolve_id, short_id, Context,
};
use crate::error::CliError;

pub struct ProductFields {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub cost: Option<f64>,
    pub size: Option<String>,
    pub category: Option<String>,
}

impl ProductFields {
    const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.price.is_none()
            && self.cost.is_none()
            && self.size.is_none()
            && self.category.is_none()
    }
}

pub async fn run_product_add(ctx: &Context, draft: ProductDraft) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let product = service.save_product(draft).await?;
    println!("Created product {} ({})", product.display_name(), product.id);
    Ok(())
}

pub async fn run_product_list(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let products = service.products().await;

    if as_json {
        return print_json(&products);
    }
    if products.is_empty() {
        println!("No products.");
        return Ok(());
    }
    for line in format_product_lines(&products) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_product_edit(
    ctx: &Context,
    id: &str,
    fields: ProductFields,
) -> Result<(), CliError> {
    if fields.is_empty() {
        return Err(CliError::NothingToChange);
    }

    let service = open_session(ctx).await?;
    let products = service.products().await;
    let product_id = resolve_id(id, products.iter().map(|p| p.id.as_str()), "product")?;
    let Some(mut product) = products.into_iter().find(|p| p.id == product_id) else {
        return Err(CliError::NotFound {
            kind: "product",
            query: id.to_string(),
        });
    };

    let expected_version = product.version.unwrap_or(0);
    if let Some(name) = fields.name {
        product.name = name;
    }
    if let Some(price) = fields.price {
        product.price = price;
    }
    if let Some(cost) = fields.cost {
        product.cost_price = cost;
    }
    if fields.size.is_some() {
        product.size = fields.size;
    }
    if fields.category.is_some() {
        product.category = fields.category;
    }

    let updated = service.update_product(product, expected_version).await?;
    println!(
        "Updated product {} (version {})",
        updated.display_name(),
        updated.version.unwrap_or(0)
    );
    Ok(())
}

pub async fn run_product_delete(ctx: &Context, id: &str) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let products = service.products().await;
    let product_id = resolve_id(id, products.iter().map(|p| p.id.as_str()), "product")?;

    service.delete_product(&product_id).await?;
    println!("Deleted product {product_id}");
    Ok(())
}

pub fn format_product_lines(products: &[Product]) -> Vec<String> {
    products
        .iter()
        .map(|product| {
            format!(
                "{:<13}  {:<30}  price {:>8}  cost {:>8}  stock {:>5}",
                short_id(&product.id),
                product.display_name(),
                format_money(product.price),
                format_money(product.cost_price),
                product.stock
            )
        })
        .collect()
}
