use sisa_core::{PullReport, PullStatus, RemoteError, SyncError};

use crate::commands::common::{
    format_catch_up_lines, format_drain_summary, format_pull_lines, lookup_kind, print_json,
    require_remote, CliService,
};
use crate::error::CliError;

pub async fn run_pull(
    service: &CliService,
    table: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    require_remote(service)?;

    let reports = match table {
        Some(table) => {
            let kind = lookup_kind(table)?;
            let status = match service.reconciler().pull(kind).await {
                Ok(outcome) => PullStatus::from(outcome),
                Err(error) => PullStatus::Failed {
                    error: error.to_string(),
                },
            };
            vec![PullReport {
                table: kind.table,
                status,
            }]
        }
        None => service.reconciler().pull_all().await,
    };

    if as_json {
        return print_json(&reports);
    }
    for line in format_pull_lines(&reports) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_drain(
    service: &CliService,
    table: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    require_remote(service)?;

    let report = match table {
        Some(table) => service.reconciler().drain_table(lookup_kind(table)?).await?,
        None => service.reconciler().drain().await,
    };

    if as_json {
        print_json(&report)?;
    } else {
        println!("Drain finished: {}", format_drain_summary(&report));
    }

    if report.auth_required {
        return Err(CliError::AuthRequired);
    }
    Ok(())
}

pub async fn run_sync(service: &CliService, as_json: bool) -> Result<(), CliError> {
    require_remote(service)?;

    let report = service.reconciler().sync().await;

    if as_json {
        print_json(&report)?;
    } else {
        println!("Drain: {}", format_drain_summary(&report.drain));
        for line in format_pull_lines(&report.pulls) {
            println!("{line}");
        }
        if report.pulls.is_empty() && !report.drain.auth_required {
            println!("No table was idle enough to pull");
        }
    }

    if report.drain.auth_required {
        return Err(CliError::AuthRequired);
    }
    Ok(())
}

pub async fn run_catch_up(service: &CliService, as_json: bool) -> Result<(), CliError> {
    require_remote(service)?;

    let catch_up = match service.reconciler().catch_up().await {
        Ok(catch_up) => catch_up,
        Err(SyncError::Remote(RemoteError::Auth { .. })) => return Err(CliError::AuthRequired),
        Err(error) => return Err(error.into()),
    };

    if as_json {
        return print_json(&catch_up);
    }
    for line in format_catch_up_lines(&catch_up) {
        println!("{line}");
    }
    Ok(())
}
