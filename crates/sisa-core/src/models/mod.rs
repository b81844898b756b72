//! Data models for Sisa

pub mod entity;
mod error_log;
mod queue;

pub use entity::{Column, ColumnType, EntityKind, MirrorRow, ALL_KINDS};
pub use error_log::ErrorLogEntry;
pub use queue::{
    Mutation, QueueCounts, QueueOp, QueueStatus, SyncQueueEntry, PAYLOAD_IF_MATCH_KEY,
    PAYLOAD_TIMESTAMP_KEY,
};
