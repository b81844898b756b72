//! Diagnostic error log entry

use serde::{Deserialize, Serialize};

/// One appended diagnostic record. Never referenced by business logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub error_message: String,
    /// Error source chain, one cause per line
    pub error_stack: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}
