use sisa_core::MirrorRow;

use crate::commands::common::{lookup_kind, print_json, CliService};
use crate::error::CliError;

pub async fn run_mirror(service: &CliService, table: &str, as_json: bool) -> Result<(), CliError> {
    let kind = lookup_kind(table)?;
    let rows = service.mirror().get_all(kind).await;

    if as_json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No {kind} rows mirrored.");
        return Ok(());
    }
    for row in &rows {
        println!("{}", format_row(row)?);
    }
    Ok(())
}

/// One row per line; rows not yet created remotely are marked.
pub fn format_row(row: &MirrorRow) -> Result<String, CliError> {
    let id = row.id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let marker = if row.id.is_some_and(|id| id < 0) {
        " (local)"
    } else {
        ""
    };
    let version = row
        .version
        .map(|version| format!(" v{version}"))
        .unwrap_or_default();
    Ok(format!(
        "{id}{marker}{version}  {}",
        serde_json::to_string(&row.fields)?
    ))
}
