use crate::cli::ErrorCommands;
use crate::commands::common::{format_error_lines, print_json, CliService};
use crate::error::CliError;

pub async fn run_errors(service: &CliService, command: ErrorCommands) -> Result<(), CliError> {
    match command {
        ErrorCommands::List { limit, stack, json } => {
            let entries = service.errors().list(limit).await;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No errors recorded.");
                return Ok(());
            }
            for line in format_error_lines(&entries, stack) {
                println!("{line}");
            }
            Ok(())
        }
        ErrorCommands::Clear => {
            let count = service.errors().clear().await;
            println!("Deleted {count} error log entries");
            Ok(())
        }
    }
}
