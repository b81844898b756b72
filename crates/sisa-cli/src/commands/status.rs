use crate::commands::common::{format_status_lines, now_ms, print_json, CliService};
use crate::error::CliError;

pub async fn run_status(service: &CliService, as_json: bool) -> Result<(), CliError> {
    let statuses = service.status().await;
    if as_json {
        return print_json(&statuses);
    }

    for line in format_status_lines(&statuses, now_ms()) {
        println!("{line}");
    }

    let logged = service.errors().count().await;
    if logged > 0 {
        println!("{logged} entries in the error log (see `sisa errors list`)");
    }
    Ok(())
}
