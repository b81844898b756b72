use crate::cli::RecordCommands;
use crate::commands::common::{lookup_kind, parse_assignments, CliService};
use crate::commands::mirror::format_row;
use crate::error::CliError;

pub async fn run_record(service: &CliService, command: RecordCommands) -> Result<(), CliError> {
    match command {
        RecordCommands::Create { table, fields } => {
            let kind = lookup_kind(&table)?;
            let row = service
                .create_record(kind, parse_assignments(&fields)?)
                .await?;
            println!("Created {kind} {}", format_row(&row)?);
        }
        RecordCommands::Update { table, id, fields } => {
            let kind = lookup_kind(&table)?;
            let entry_id = service
                .update_record(kind, id, parse_assignments(&fields)?)
                .await?;
            println!("Updated {kind} {id} (queued as #{entry_id})");
        }
        RecordCommands::Delete { table, id } => {
            let kind = lookup_kind(&table)?;
            let entry_id = service.delete_record(kind, id).await?;
            println!("Deleted {kind} {id} (queued as #{entry_id})");
        }
    }
    Ok(())
}
