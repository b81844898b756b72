//! sisa-core - Offline-first sync core for Sisa
//!
//! This crate holds the local mirror of server entities, the durable sync
//! queue, the diagnostic error log and the reconciliation protocol that keeps
//! them consistent with the remote API. Front-ends share one [`db::Store`]
//! handle and talk to it through [`services::SyncService`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use db::Store;
pub use error::{Error, Result};
pub use models::{EntityKind, MirrorRow, QueueOp, QueueStatus, SyncQueueEntry};
pub use remote::{HttpRemote, RemoteApi, RemoteError};
pub use services::{ErrorLog, MirrorStore, SyncQueue, SyncService, TableStatus};
pub use sync::{
    CatchUp, DrainReport, PullReport, PullStatus, Reconciler, SyncError, SyncReport,
};
