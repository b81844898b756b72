use clap::{CommandFactory, Parser};
use pretty_assertions::assert_eq;
use serde_json::json;
use sisa_core::{CatchUp, ClientConfig, DrainReport, MirrorRow, PullReport, PullStatus, QueueStatus};
use tempfile::tempdir;

use crate::cli::{Cli, Commands, CompletionShell, QueueCommands, RecordCommands, StatusFilter};
use crate::commands::common::{
    format_catch_up_lines, format_drain_summary, format_pull_lines, format_relative_time, open_service,
    parse_assignments, require_remote,
};
use crate::commands::completions::render_completions;
use crate::commands::config::{apply_config_update, ConfigView};
use crate::commands::mirror::format_row;
use crate::commands::queue::{run_queue_clear, run_queue_remove, status_from_filter};
use crate::commands::record::run_record;
use crate::commands::sync::{run_catch_up, run_drain, run_pull};
use crate::error::CliError;

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn record_update_accepts_negative_ids() {
    let cli = Cli::try_parse_from([
        "sisa", "record", "update", "clients", "-3", "--set", "name=Ana",
    ])
    .unwrap();

    match cli.command {
        Some(Commands::Record {
            command: RecordCommands::Update { table, id, fields },
        }) => {
            assert_eq!(table, "clients");
            assert_eq!(id, -3);
            assert_eq!(fields, vec!["name=Ana".to_string()]);
        }
        _ => panic!("expected record update"),
    }
}

#[test]
fn queue_retry_rejects_id_and_table_together() {
    assert!(Cli::try_parse_from(["sisa", "queue", "retry", "4", "--table", "jobs"]).is_err());
    assert!(matches!(
        Cli::try_parse_from(["sisa", "queue", "retry", "--table", "jobs"])
            .unwrap()
            .command,
        Some(Commands::Queue {
            command: QueueCommands::Retry { id: None, .. }
        })
    ));
}

#[test]
fn parse_assignments_keeps_json_types() {
    let row = parse_assignments(&[
        "name=Ana".to_string(),
        "amount=10.5".to_string(),
        "active=true".to_string(),
        "phone=007".to_string(),
        "note= spaced ".to_string(),
    ])
    .unwrap();

    assert_eq!(row.get("name"), Some(&json!("Ana")));
    assert_eq!(row.get("amount"), Some(&json!(10.5)));
    assert_eq!(row.get("active"), Some(&json!(true)));
    assert_eq!(row.get("phone"), Some(&json!("007")));
    assert_eq!(row.get("note"), Some(&json!(" spaced ")));
}

#[test]
fn parse_assignments_rejects_missing_name_or_separator() {
    assert!(matches!(
        parse_assignments(&["name".to_string()]),
        Err(CliError::InvalidAssignment(_))
    ));
    assert!(matches!(
        parse_assignments(&["=value".to_string()]),
        Err(CliError::InvalidAssignment(_))
    ));
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn drain_summary_mentions_blocked_tables_and_auth() {
    let report = DrainReport {
        applied: 2,
        failed: 1,
        blocked_tables: vec!["jobs".to_string()],
        auth_required: true,
    };
    assert_eq!(
        format_drain_summary(&report),
        "2 applied, 1 failed; blocked: jobs; halted: authentication required"
    );
}

#[test]
fn pull_lines_describe_each_outcome() {
    let lines = format_pull_lines(&[
        PullReport {
            table: "clients",
            status: PullStatus::Replaced { rows: 3 },
        },
        PullReport {
            table: "jobs",
            status: PullStatus::KeptExisting,
        },
        PullReport {
            table: "tariffs",
            status: PullStatus::Failed {
                error: "boom".to_string(),
            },
        },
    ]);

    assert!(lines[0].contains("replaced (3 rows)"));
    assert!(lines[1].contains("kept local rows"));
    assert!(lines[2].ends_with("failed: boom"));
}

#[test]
fn catch_up_lines_name_the_mode() {
    assert_eq!(
        format_catch_up_lines(&CatchUp::Incremental {
            applied: 4,
            cursor: Some(12),
        }),
        vec!["Applied 4 server changes; history cursor at 12".to_string()]
    );

    let lines = format_catch_up_lines(&CatchUp::FullPull {
        pulls: vec![PullReport {
            table: "clients",
            status: PullStatus::Replaced { rows: 2 },
        }],
    });
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("pulled every table"));
    assert!(lines[1].contains("replaced (2 rows)"));
}

#[test]
fn catch_up_command_parses() {
    let cli = Cli::try_parse_from(["sisa", "catch-up", "--json"]).unwrap();
    assert!(matches!(cli.command, Some(Commands::CatchUp { json: true })));
}

#[test]
fn format_row_marks_local_rows() {
    let local = MirrorRow::with_id(-1).field("name", "Ana");
    assert_eq!(format_row(&local).unwrap(), r#"-1 (local)  {"name":"Ana"}"#);

    let synced = MirrorRow::with_id(7).field("name", "Ana").version(2);
    assert_eq!(format_row(&synced).unwrap(), r#"7 v2  {"name":"Ana"}"#);
}

#[test]
fn status_filter_maps_to_queue_status() {
    assert_eq!(status_from_filter(StatusFilter::Failed), QueueStatus::Failed);
    assert_eq!(status_from_filter(StatusFilter::Pending), QueueStatus::Pending);
}

#[test]
fn completions_name_the_binary() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).unwrap();
    assert!(script.contains("sisa"));
}

#[test]
fn config_update_overlays_and_clears_fields() {
    let existing = ClientConfig {
        api_url: Some("https://old.example.com".to_string()),
        api_token: Some("secret".to_string()),
        db_path: None,
        request_timeout_secs: None,
    };

    let updated = apply_config_update(
        existing,
        Some("https://new.example.com/".to_string()),
        Some(String::new()),
        None,
        Some(5),
    );

    assert_eq!(updated.api_url.as_deref(), Some("https://new.example.com"));
    assert_eq!(updated.api_token, None);
    assert_eq!(updated.request_timeout_secs, Some(5));
}

#[test]
fn config_view_never_carries_the_token() {
    let dir = tempdir().unwrap();
    let config = ClientConfig {
        api_token: Some("secret".to_string()),
        db_path: Some(dir.path().join("store.db")),
        ..ClientConfig::default()
    };

    let view = ConfigView::new(&config, &dir.path().join("config.json"));
    let rendered = serde_json::to_string(&view).unwrap();

    assert!(view.api_token_set);
    assert!(!rendered.contains("secret"));
    assert_eq!(view.request_timeout_secs, 15);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_store_accepts_records_but_not_remote_commands() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("sisa.db");
    let service = open_service(&ClientConfig::default(), &db_path)
        .await
        .unwrap();

    run_record(
        &service,
        RecordCommands::Create {
            table: "clients".to_string(),
            fields: vec!["business_name=Ana".to_string()],
        },
    )
    .await
    .unwrap();

    let entries = service.queue().list_all().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].table_name, "clients");
    assert!(db_path.exists());

    assert!(matches!(
        require_remote(&service),
        Err(CliError::RemoteNotConfigured)
    ));
    assert!(matches!(
        run_pull(&service, None, false).await,
        Err(CliError::RemoteNotConfigured)
    ));
    assert!(matches!(
        run_drain(&service, None, false).await,
        Err(CliError::RemoteNotConfigured)
    ));
    assert!(matches!(
        run_catch_up(&service, false).await,
        Err(CliError::RemoteNotConfigured)
    ));
    assert_eq!(service.queue().list_all().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_clear_requires_confirmation() {
    let dir = tempdir().unwrap();
    let service = open_service(&ClientConfig::default(), &dir.path().join("sisa.db"))
        .await
        .unwrap();

    run_record(
        &service,
        RecordCommands::Create {
            table: "statuses".to_string(),
            fields: vec!["label=Open".to_string()],
        },
    )
    .await
    .unwrap();

    assert!(matches!(
        run_queue_clear(&service, false).await,
        Err(CliError::ClearNotConfirmed)
    ));
    assert_eq!(service.queue().list_all().await.len(), 1);

    run_queue_clear(&service, true).await.unwrap();
    assert!(service.queue().list_all().await.is_empty());
    assert!(matches!(
        run_queue_remove(&service, 1).await,
        Err(CliError::EntryNotFound(1))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_table_is_rejected() {
    let dir = tempdir().unwrap();
    let service = open_service(&ClientConfig::default(), &dir.path().join("sisa.db"))
        .await
        .unwrap();

    let result = run_record(
        &service,
        RecordCommands::Delete {
            table: "invoices".to_string(),
            id: 1,
        },
    )
    .await;

    assert!(matches!(
        result,
        Err(CliError::Core(sisa_core::Error::InvalidInput(_)))
    ));
}
