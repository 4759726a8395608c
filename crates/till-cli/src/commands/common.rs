use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use till_core::models::SaleLineInput;
use till_core::services::{DatabaseService, TillService};
use till_core::sync::{InMemoryRemoteStore, RemoteStore, RestRemoteStore};
use till_core::SyncConfig;

use crate::error::CliError;

/// Settings shared by every command of one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub pin: Option<String>,
    pub offline_demo: bool,
}

impl Context {
    pub fn new(db_path: Option<PathBuf>, pin: Option<String>, offline_demo: bool) -> Self {
        Self {
            db_path: resolve_db_path(db_path),
            pin: pin.or_else(|| env::var("TILL_PIN").ok()),
            offline_demo,
        }
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TILL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("till")
        .join("till.db")
}

pub async fn open_database(path: &Path) -> Result<DatabaseService, CliError> {
    Ok(DatabaseService::open_path(path.to_path_buf()).await?)
}

/// Open the till without logging anyone in.
pub async fn open_service(ctx: &Context) -> Result<TillService, CliError> {
    let db = open_database(&ctx.db_path).await?;
    Ok(TillService::open(db).await?)
}

/// Open the till and log in the operator given by `--pin` / `TILL_PIN`.
pub async fn open_session(ctx: &Context) -> Result<TillService, CliError> {
    let pin = ctx.pin.as_deref().ok_or(CliError::PinRequired)?;
    let service = open_service(ctx).await?;
    service.login(pin).await?;
    Ok(service)
}

pub fn sync_config() -> Result<SyncConfig, CliError> {
    Ok(SyncConfig::from_env()?)
}

/// Remote store for sync commands: the in-process store for demos, the REST
/// endpoint otherwise.
pub fn remote_store(
    config: &SyncConfig,
    offline_demo: bool,
) -> Result<Arc<dyn RemoteStore>, CliError> {
    if offline_demo {
        tracing::info!("Using in-process remote store");
        return Ok(Arc::new(InMemoryRemoteStore::new()));
    }
    if !config.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }
    Ok(Arc::new(RestRemoteStore::from_config(config)?))
}

/// Parse `PRODUCT_ID` or `PRODUCT_ID:QTY`.
pub fn parse_sale_line(raw: &str) -> Result<SaleLineInput, CliError> {
    let invalid = || CliError::InvalidSaleLine(raw.to_string());
    let (product_id, quantity) = match raw.rsplit_once(':') {
        Some((product_id, quantity)) => {
            let quantity = quantity.trim().parse::<i64>().map_err(|_| invalid())?;
            (product_id.trim(), quantity)
        }
        None => (raw.trim(), 1),
    };

    if product_id.is_empty() || quantity <= 0 {
        return Err(invalid());
    }
    Ok(SaleLineInput {
        product_id: product_id.to_string(),
        quantity,
        price_at_sale: None,
        cost_at_sale: None,
    })
}

/// Resolve an exact id or a unique id prefix.
pub fn resolve_id<'a>(
    query: &str,
    ids: impl IntoIterator<Item = &'a str>,
    kind: &'static str,
) -> Result<String, CliError> {
    let query = query.trim();
    let not_found = || CliError::NotFound {
        kind,
        query: query.to_string(),
    };
    if query.is_empty() {
        return Err(not_found());
    }

    let mut matches = Vec::new();
    for id in ids {
        if id == query {
            return Ok(id.to_string());
        }
        if id.starts_with(query) {
            matches.push(id);
        }
    }

    match matches.as_slice() {
        [] => Err(not_found()),
        [id] => Ok((*id).to_string()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "{kind} prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_money(amount: f64) -> String {
    format!("{amount:.2}")
}

/// One-line preview of free text.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated = collapsed
            .chars()
            .take(max_chars.saturating_sub(3))
            .collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
