use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use till_core::models::Role;

#[derive(Parser)]
#[command(name = "till")]
#[command(about = "Offline-first point of sale from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// PIN of the operator running the command (falls back to TILL_PIN)
    #[arg(long, global = true, value_name = "PIN")]
    pub pin: Option<String>,

    /// Sync against an in-process remote instead of the configured endpoint
    #[arg(long, global = true)]
    pub offline_demo: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage products
    Product {
        #[command(subcommand)]
        command: ProductCommands,
    },
    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Record and list sales
    Sale {
        #[command(subcommand)]
        command: SaleCommands,
    },
    /// Request and resolve sale voids
    Void {
        #[command(subcommand)]
        command: VoidCommands,
    },
    /// Request and resolve stock adjustments
    Stock {
        #[command(subcommand)]
        command: StockCommands,
    },
    /// Open and close cashier shifts
    Shift {
        #[command(subcommand)]
        command: ShiftCommands,
    },
    /// Show or change business settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Push queued changes to the remote store
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Inspect and resolve dead-lettered sync entries
    #[command(name = "dead-letter", alias = "dlq")]
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },
    /// Merge remote and local collections
    Reconcile {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that every sale line has exactly one product sale log
    Integrity {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ProductCommands {
    /// Create a product
    Add {
        /// Product name
        name: String,
        /// Unit price
        #[arg(long)]
        price: f64,
        /// Unit cost
        #[arg(long)]
        cost: f64,
        /// Initial stock
        #[arg(long, default_value = "0")]
        stock: i64,
        /// Size label, e.g. 330ml
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// List products
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit a product's name, prices, size or category
    Edit {
        /// Product ID or unique ID prefix
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long)]
        cost: Option<f64>,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete a product
    Delete {
        /// Product ID or unique ID prefix
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RoleArg {
    Admin,
    Manager,
    Cashier,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => Self::Admin,
            RoleArg::Manager => Self::Manager,
            RoleArg::Cashier => Self::Cashier,
        }
    }
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user; the first user becomes the admin
    Add {
        /// Display name
        name: String,
        /// PIN the new user logs in with
        #[arg(long, value_name = "PIN")]
        user_pin: String,
        #[arg(long, value_enum, default_value_t = RoleArg::Cashier)]
        role: RoleArg,
        /// Extra permission string (repeatable), e.g. void:approve
        #[arg(long = "permission", value_name = "PERMISSION")]
        permissions: Vec<String>,
    },
    /// List users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a user
    Delete {
        /// User ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SaleCommands {
    /// Record a sale from PRODUCT_ID[:QTY] lines
    New {
        /// Sale lines, e.g. P1:2 P2
        #[arg(required = true)]
        items: Vec<String>,
        /// Client sale id; replaying an existing id returns the recorded sale
        #[arg(long)]
        sale_id: Option<String>,
        #[arg(long, default_value = "CASH")]
        payment: String,
    },
    /// List recent sales
    List {
        /// Number of sales to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum VoidCommands {
    /// Ask for a sale to be voided
    Request {
        /// Sale ID or unique ID prefix
        sale_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Approve a pending void request
    Approve { id: String },
    /// Reject a pending void request
    Reject { id: String },
    /// List void requests
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum StockCommands {
    /// Ask for a stock adjustment
    Request {
        /// Product ID or unique ID prefix
        product_id: String,
        /// Signed quantity change, e.g. -3 or 12
        #[arg(allow_hyphen_values = true)]
        change: i64,
        #[arg(long)]
        reason: String,
    },
    /// Approve a pending stock change
    Approve { id: String },
    /// Reject a pending stock change
    Reject { id: String },
    /// List stock change requests
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ShiftCommands {
    /// Open a shift for the operator
    Open {
        /// Cash in the drawer at opening
        #[arg(default_value = "0")]
        cash: f64,
    },
    /// Close the operator's open shift
    Close {
        /// Cash in the drawer at closing
        cash: f64,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show business settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change business settings
    Set {
        #[arg(long)]
        business_name: Option<String>,
        /// ISO 4217 currency code
        #[arg(long)]
        currency: Option<String>,
        /// Tax rate as a fraction, e.g. 0.16
        #[arg(long)]
        tax_rate: Option<f64>,
        #[arg(long)]
        receipt_footer: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Drain the sync queue once
    Run {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing on the configured interval until interrupted
    Daemon,
    /// Show queue and dead-letter counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum DeadLetterCommands {
    /// List dead-lettered entries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push one entry, or every entry with --all
    Retry {
        /// Dead-letter entry id
        #[arg(required_unless_present = "all")]
        id: Option<i64>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
    /// Delete one entry, or every entry with --all
    Delete {
        /// Dead-letter entry id
        #[arg(required_unless_present = "all")]
        id: Option<i64>,
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },
}
