use till_core::db::DeadLetterRepository;
use till_core::models::FailedSyncQueueItem;
use till_core::sync::{DeadLetterQueue, UpsertGateway};

use crate::commands::common::{
    format_sync_timestamp, open_database, preview, print_json, remote_store, sync_config, Context,
};
use crate::error::CliError;

pub async fn run_dead_letter_list(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let db = open_database(&ctx.db_path).await?;
    let items = {
        let guard = db.lock().await;
        let repo = DeadLetterRepository::new(guard.connection());
        repo.list().await?
    };

    if as_json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("Dead-letter queue is empty.");
        return Ok(());
    }
    for line in format_dead_letter_lines(&items) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_dead_letter_retry(
    ctx: &Context,
    id: Option<i64>,
    all: bool,
) -> Result<(), CliError> {
    let config = sync_config()?;
    let remote = remote_store(&config, ctx.offline_demo)?;
    let db = open_database(&ctx.db_path).await?;
    let queue = DeadLetterQueue::new(db, UpsertGateway::new(remote, config.push_timeout));

    match (id, all) {
        (_, true) => {
            let report = queue.retry_all().await?;
            println!(
                "Retried dead letters: {} succeeded, {} failed",
                report.succeeded, report.failed
            );
        }
        (Some(id), false) => {
            if queue.retry_one(id).await? {
                println!("Dead-letter entry {id} synced and removed");
            } else {
                println!("Dead-letter entry {id} failed again; kept with the new error");
            }
        }
        (None, false) => return Err(CliError::MissingTarget("dead-letter entry")),
    }
    Ok(())
}

pub async fn run_dead_letter_delete(
    ctx: &Context,
    id: Option<i64>,
    all: bool,
) -> Result<(), CliError> {
    let db = open_database(&ctx.db_path).await?;
    let guard = db.lock().await;
    let repo = DeadLetterRepository::new(guard.connection());

    if all {
        let removed = repo.delete_all().await?;
        println!("Deleted {removed} dead-letter entries");
        return Ok(());
    }

    let Some(id) = id else {
        return Err(CliError::MissingTarget("dead-letter entry"));
    };
    if repo.delete(id).await? {
        println!("Deleted dead-letter entry {id}");
        Ok(())
    } else {
        Err(CliError::NotFound {
            kind: "dead-letter entry",
            query: id.to_string(),
        })
    }
}

pub fn format_dead_letter_lines(items: &[FailedSyncQueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            format!(
                "{:>5}  {}  {:<24}  {}  retries={}  {}",
                item.id,
                format_sync_timestamp(item.failed_at),
                item.action_type,
                item.entity_id().unwrap_or("-"),
                item.total_retries,
                preview(&item.last_error, 60)
            )
        })
        .collect()
}
