use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sisa")]
#[command(about = "Inspect and drive the Sisa offline sync store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replace local tables with the server's collections
    Pull {
        /// Entity table to pull (all tables when omitted)
        table: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deliver queued mutations to the server
    Drain {
        /// Only drain this table
        #[arg(long, value_name = "TABLE")]
        table: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain the queue, then pull every table left without pending work
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply server changes recorded since the last sync, or pull everything
    CatchUp {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show mirror size, queue depth and pull state per table
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and manage the sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect the diagnostic error log
    Errors {
        #[command(subcommand)]
        command: ErrorCommands,
    },
    /// List mirrored rows of a table
    Mirror {
        /// Entity table name
        table: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create, update or delete a record offline
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Show or edit the client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Syncing,
    Done,
    Failed,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued mutations in delivery order
    List {
        /// Only show entries for this table
        #[arg(long, value_name = "TABLE")]
        table: Option<String>,
        /// Only show entries with this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-arm failed entries for the next drain
    Retry {
        /// Queue entry id (all failed entries when omitted)
        id: Option<i64>,
        /// Only retry failed entries of this table
        #[arg(long, value_name = "TABLE", conflicts_with = "id")]
        table: Option<String>,
    },
    /// Re-pull the table behind a failed entry and re-arm it
    Resolve {
        /// Queue entry id
        id: i64,
    },
    /// Remove a single entry
    Remove {
        /// Queue entry id
        id: i64,
    },
    /// Drop every queued mutation
    Clear {
        /// Confirm discarding unsent work
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ErrorCommands {
    /// List recent diagnostic entries, newest first
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include the cause chain
        #[arg(long)]
        stack: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete all diagnostic entries
    Clear,
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Insert a row under a temporary id and queue its creation
    Create {
        /// Entity table name
        table: String,
        /// Field assignment `name=value` (JSON values accepted)
        #[arg(short = 's', long = "set", value_name = "NAME=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Patch a row and queue the update
    Update {
        /// Entity table name
        table: String,
        /// Row id (negative for rows not yet created remotely)
        #[arg(allow_negative_numbers = true)]
        id: i64,
        /// Field assignment `name=value` (JSON values accepted)
        #[arg(short = 's', long = "set", value_name = "NAME=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Remove a row and queue its deletion
    Delete {
        /// Entity table name
        table: String,
        /// Row id (negative for rows not yet created remotely)
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write values to the config file
    Set {
        /// Remote API base URL
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Bearer token for the remote API
        #[arg(long, value_name = "TOKEN")]
        api_token: Option<String>,
        /// Local database file
        #[arg(long = "store-path", value_name = "PATH")]
        store_path: Option<PathBuf>,
        /// Per-request deadline in seconds
        #[arg(long, value_name = "SECS")]
        request_timeout_secs: Option<u64>,
    },
    /// Print the config file location
    Path,
}
