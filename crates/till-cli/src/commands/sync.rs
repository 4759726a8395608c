use std::path::Path;

use serde::Serialize;
use till_core::db::{ConflictRepository, DeadLetterRepository, SyncQueueRepository};
use till_core::models::SyncConflict;
use till_core::sync::{PassReport, Reconciler};
use till_core::TillApp;

use crate::commands::common::{
    format_sync_timestamp, open_database, print_json, remote_store, sync_config, Context,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusItem {
    pub pending: usize,
    pub dead_letters: usize,
    pub remote_url: Option<String>,
    pub db_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflictItem {
    pub id: i64,
    pub collection: String,
    pub entity_id: String,
    pub winner: String,
    pub local_version: Option<u64>,
    pub remote_version: Option<u64>,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// Reconcile, drain the queue once and stop.
pub async fn run_sync(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let config = sync_config()?.with_start_online(false);
    let remote = remote_store(&config, ctx.offline_demo)?;
    let db = open_database(&ctx.db_path).await?;

    let app = TillApp::init(db, remote, &config).await?;
    let result = app.run_sync_now().await;
    let status = app.status();
    app.teardown().await;
    let report = result?;

    if as_json {
        return print_json(&report);
    }
    println!("{}", format_pass_report(&report));
    if let Some(error) = status.last_error {
        println!("Last error: {error}");
    }
    if status.dead_letters > 0 {
        println!(
            "{} entries in the dead-letter queue; see `till dead-letter list`",
            status.dead_letters
        );
    }
    Ok(())
}

/// Keep the processor running until Ctrl+C.
pub async fn run_sync_daemon(ctx: &Context) -> Result<(), CliError> {
    let config = sync_config()?;
    let remote = remote_store(&config, ctx.offline_demo)?;
    let db = open_database(&ctx.db_path).await?;

    let app = TillApp::init(db, remote, &config).await?;
    let mut status = app.subscribe_status();
    println!(
        "Syncing every {}s; press Ctrl+C to stop",
        config.interval.as_secs()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(
                    state = ?current.state,
                    pending = current.pending,
                    dead_letters = current.dead_letters,
                    "Sync status changed"
                );
            }
        }
    }

    app.teardown().await;
    println!("Sync stopped");
    Ok(())
}

pub async fn run_sync_status(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let config = sync_config()?;
    let db = open_database(&ctx.db_path).await?;
    let (pending, dead_letters) = {
        let guard = db.lock().await;
        let conn = guard.connection();
        let pending = SyncQueueRepository::new(conn).count().await?;
        let dead_letters = DeadLetterRepository::new(conn).count().await?;
        (pending, dead_letters)
    };

    let item = SyncStatusItem {
        pending,
        dead_letters,
        remote_url: config.remote_url,
        db_path: ctx.db_path.display().to_string(),
    };
    if as_json {
        return print_json(&item);
    }

    println!("Database:     {}", item.db_path);
    println!(
        "Remote:       {}",
        item.remote_url.as_deref().unwrap_or("not configured")
    );
    println!("Pending:      {}", item.pending);
    println!("Dead letters: {}", item.dead_letters);
    Ok(())
}

pub async fn run_sync_conflicts(
    ctx: &Context,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = list_sync_conflicts(limit, &ctx.db_path).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        return print_json(&json_items);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_reconcile(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let config = sync_config()?;
    let remote = remote_store(&config, ctx.offline_demo)?;
    let db = open_database(&ctx.db_path).await?;

    let report = Reconciler::new(db, remote, &config).reconcile_all().await?;
    if as_json {
        return print_json(&report);
    }
    for collection in &report.collections {
        println!("{collection}");
    }
    println!(
        "Requeued {}, conflicts {}, duplicates removed {}",
        report.requeued(),
        report.conflicts(),
        report.duplicates_removed()
    );
    Ok(())
}

pub async fn list_sync_conflicts(
    limit: usize,
    db_path: &Path,
) -> Result<Vec<SyncConflict>, CliError> {
    let db = open_database(db_path).await?;
    let guard = db.lock().await;
    let conflicts = ConflictRepository::new(guard.connection())
        .list(limit)
        .await?;
    Ok(conflicts)
}

pub fn format_pass_report(report: &PassReport) -> String {
    format!(
        "Pushed {} of {} entries ({} to retry, {} dead-lettered, {} dropped)",
        report.succeeded,
        report.attempted,
        report.retried,
        report.dead_lettered,
        report.dropped_unknown
    )
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        collection: conflict.collection.clone(),
        entity_id: conflict.entity_id.clone(),
        winner: conflict.winner.to_string(),
        local_version: conflict.local_version,
        remote_version: conflict.remote_version,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

fn format_version(version: Option<u64>) -> String {
    version.map_or_else(|| "-".to_string(), |version| format!("v{version}"))
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {}  {}={}  winner={:<6}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.collection,
                conflict.entity_id,
                conflict.winner,
                format_version(conflict.local_version),
                format_version(conflict.remote_version)
            )
        })
        .collect()
}
