//! Database layer for sisa

mod connection;
mod error_log_repository;
mod meta_repository;
pub mod migrations;
mod mirror_repository;
mod queue_repository;

pub use connection::{Database, Store};
pub use error_log_repository::{ErrorLogRepository, SqliteErrorLogRepository};
pub use meta_repository::{MetaRepository, SqliteMetaRepository};
pub use mirror_repository::{MirrorRepository, ReplaceOutcome, SqliteMirrorRepository};
pub use queue_repository::{
    generate_batch_id, generate_nonce, generate_request_id, NewQueueEntry, QueueRepository, SqliteQueueRepository,
    NONCE_LEN,
};
