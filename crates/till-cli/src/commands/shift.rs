use crate::commands::common::{format_money, open_session, Context};
use crate::error::CliError;

pub async fn run_shift_open(ctx: &Context, cash: f64) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let shift = service.open_shift(cash).await?;
    println!(
        "Opened shift {} with {} in the drawer",
        shift.id,
        format_money(shift.opening_cash)
    );
    Ok(())
}

pub async fn run_shift_close(ctx: &Context, cash: f64) -> Result<(), CliError> {
    let service = open_session(ctx).await?;
    let shift = service.close_shift(cash).await?;

    let sales = service
        .sales()
        .await
        .into_iter()
        .filter(|sale| sale.shift_id.as_deref() == Some(shift.id.as_str()) && !sale.is_voided())
        .collect::<Vec<_>>();
    let taken: f64 = sales.iter().map(|sale| sale.total_amount).sum();

    println!("Closed shift {}", shift.id);
    println!("  sales:   {} ({})", sales.len(), format_money(taken));
    println!("  opening: {}", format_money(shift.opening_cash));
    println!("  closing: {}", format_money(cash));
    Ok(())
}
