//! Till CLI - run a point-of-sale till from the command line
//!
//! Every command works against the local store; `sync` and `reconcile`
//! talk to the configured remote.

mod cli;
mod commands;
mod error;


use clap::Parser;
use till_core::models::{ProductDraft, UserDraft};

use crate::cli::{
    Cli, Commands, DeadLetterCommands, ProductCommands, SaleCommands, SettingsCommands,
    ShiftCommands, StockCommands, SyncCommands, UserCommands, VoidCommands,
};
use crate::commands::common::Context;
use crate::commands::product::ProductFields;
use crate::commands::settings::SettingsChanges;
use crate::commands::{
    dead_letter, integrity, product, requests, sale, settings, shift, sync, user,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("till=info,till_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context::new(cli.db_path, cli.pin, cli.offline_demo);

    match cli.command {
        Commands::Product { command } => run_product(&ctx, command).await,
        Commands::User { command } => run_user(&ctx, command).await,
        Commands::Sale { command } => match command {
            SaleCommands::New {
                items,
                sale_id,
                payment,
            } => sale::run_sale_new(&ctx, &items, sale_id, &payment).await,
            SaleCommands::List { limit, json } => sale::run_sale_list(&ctx, limit, json).await,
        },
        Commands::Void { command } => match command {
            VoidCommands::Request { sale_id, reason } => {
                requests::run_void_request(&ctx, &sale_id, &reason).await
            }
            VoidCommands::Approve { id } => requests::run_void_resolve(&ctx, &id, true).await,
            VoidCommands::Reject { id } => requests::run_void_resolve(&ctx, &id, false).await,
            VoidCommands::List { json } => requests::run_void_list(&ctx, json).await,
        },
        Commands::Stock { command } => match command {
            StockCommands::Request {
                product_id,
                change,
                reason,
            } => requests::run_stock_request(&ctx, &product_id, change, &reason).await,
            StockCommands::Approve { id } => requests::run_stock_resolve(&ctx, &id, true).await,
            StockCommands::Reject { id } => requests::run_stock_resolve(&ctx, &id, false).await,
            StockCommands::List { json } => requests::run_stock_list(&ctx, json).await,
        },
        Commands::Shift { command } => match command {
            ShiftCommands::Open { cash } => shift::run_shift_open(&ctx, cash).await,
            ShiftCommands::Close { cash } => shift::run_shift_close(&ctx, cash).await,
        },
        Commands::Settings { command } => match command {
            SettingsCommands::Show { json } => settings::run_settings_show(&ctx, json).await,
            SettingsCommands::Set {
                business_name,
                currency,
                tax_rate,
                receipt_footer,
            } => {
                let changes = SettingsChanges {
                    business_name,
                    currency,
                    tax_rate,
                    receipt_footer,
                };
                settings::run_settings_set(&ctx, changes).await
            }
        },
        Commands::Sync { command } => match command {
            SyncCommands::Run { json } => sync::run_sync(&ctx, json).await,
            SyncCommands::Daemon => sync::run_sync_daemon(&ctx).await,
            SyncCommands::Status { json } => sync::run_sync_status(&ctx, json).await,
            SyncCommands::Conflicts { limit, json } => {
                sync::run_sync_conflicts(&ctx, limit, json).await
            }
        },
        Commands::DeadLetter { command } => match command {
            DeadLetterCommands::List { json } => dead_letter::run_dead_letter_list(&ctx, json).await,
            DeadLetterCommands::Retry { id, all } => {
                dead_letter::run_dead_letter_retry(&ctx, id, all).await
            }
            DeadLetterCommands::Delete { id, all } => {
                dead_letter::run_dead_letter_delete(&ctx, id, all).await
            }
        },
        Commands::Reconcile { json } => sync::run_reconcile(&ctx, json).await,
        Commands::Integrity { json } => integrity::run_integrity(&ctx, json).await,
    }
}

async fn run_product(ctx: &Context, command: ProductCommands) -> Result<(), CliError> {
    match command {
        ProductCommands::Add {
            name,
            price,
            cost,
            stock,
            size,
            category,
        } => {
            let draft = ProductDraft {
                name,
                size,
                price,
                cost_price: cost,
                stock,
                category,
            };
            product::run_product_add(ctx, draft).await
        }
        ProductCommands::List { json } => product::run_product_list(ctx, json).await,
        ProductCommands::Edit {
            id,
            name,
            price,
            cost,
            size,
            category,
        } => {
            let fields = ProductFields {
                name,
                price,
                cost,
                size,
                category,
            };
            product::run_product_edit(ctx, &id, fields).await
        }
        ProductCommands::Delete { id } => product::run_product_delete(ctx, &id).await,
    }
}

async fn run_user(ctx: &Context, command: UserCommands) -> Result<(), CliError> {
    match command {
        UserCommands::Add {
            name,
            user_pin,
            role,
            permissions,
        } => {
            let draft = UserDraft {
                name,
                pin: user_pin,
                role: role.into(),
                permissions,
            };
            user::run_user_add(ctx, draft).await
        }
        UserCommands::List { json } => user::run_user_list(ctx, json).await,
        UserCommands::Delete { id } => user::run_user_delete(ctx, &id).await,
    }
}
