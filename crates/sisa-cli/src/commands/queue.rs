use sisa_core::QueueStatus;

use crate::cli::{QueueCommands, StatusFilter};
use crate::commands::common::{
    format_queue_lines, lookup_kind, now_ms, print_json, require_remote, CliService,
};
use crate::error::CliError;

pub async fn run_queue(service: &CliService, command: QueueCommands) -> Result<(), CliError> {
    match command {
        QueueCommands::List {
            table,
            status,
            json,
        } => run_queue_list(service, table.as_deref(), status, json).await,
        QueueCommands::Retry { id, table } => run_queue_retry(service, id, table.as_deref()).await,
        QueueCommands::Resolve { id } => run_queue_resolve(service, id).await,
        QueueCommands::Remove { id } => run_queue_remove(service, id).await,
        QueueCommands::Clear { yes } => run_queue_clear(service, yes).await,
    }
}

pub const fn status_from_filter(filter: StatusFilter) -> QueueStatus {
    match filter {
        StatusFilter::Pending => QueueStatus::Pending,
        StatusFilter::Syncing => QueueStatus::Syncing,
        StatusFilter::Done => QueueStatus::Done,
        StatusFilter::Failed => QueueStatus::Failed,
    }
}

pub async fn run_queue_list(
    service: &CliService,
    table: Option<&str>,
    status: Option<StatusFilter>,
    as_json: bool,
) -> Result<(), CliError> {
    let mut entries = match table {
        Some(table) => service.queue().list_for_table(lookup_kind(table)?.table).await,
        None => service.queue().list_all().await,
    };
    if let Some(filter) = status {
        let status = status_from_filter(filter);
        entries.retain(|entry| entry.status == status);
    }

    if as_json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("Sync queue is empty.");
        return Ok(());
    }
    for line in format_queue_lines(&entries, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_retry(
    service: &CliService,
    id: Option<i64>,
    table: Option<&str>,
) -> Result<(), CliError> {
    if let Some(id) = id {
        let Some(entry) = service.queue().get(id).await else {
            return Err(CliError::EntryNotFound(id));
        };
        if service.queue().retry(id).await? {
            println!("Re-armed entry #{id}");
        } else {
            println!("Entry #{id} is {}, nothing to retry", entry.status);
        }
        return Ok(());
    }

    let table = table.map(lookup_kind).transpose()?.map(|kind| kind.table);
    let count = service.queue().retry_failed(table).await?;
    println!("Re-armed {count} failed entries");
    Ok(())
}

pub async fn run_queue_resolve(service: &CliService, id: i64) -> Result<(), CliError> {
    require_remote(service)?;
    let entry = service.reconciler().resolve_conflict(id).await?;
    println!(
        "Re-pulled {} and re-armed entry #{} ({})",
        entry.table_name, entry.id, entry.status
    );
    Ok(())
}

pub async fn run_queue_remove(service: &CliService, id: i64) -> Result<(), CliError> {
    if !service.queue().remove(id).await? {
        return Err(CliError::EntryNotFound(id));
    }
    println!("Removed entry #{id}");
    Ok(())
}

pub async fn run_queue_clear(service: &CliService, confirmed: bool) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ClearNotConfirmed);
    }
    let count = service.queue().clear().await?;
    println!("Discarded {count} queued entries");
    Ok(())
}
