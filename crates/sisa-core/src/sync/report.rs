//! Outcomes of pulls and drains

use std::fmt;

use serde::Serialize;

use crate::db::ReplaceOutcome;

/// Conceptual per-table pull state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSyncState {
    #[default]
    Unsynced,
    Pulling,
    Synced,
    PullFailed,
}

impl fmt::Display for TableSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsynced => "unsynced",
            Self::Pulling => "pulling",
            Self::Synced => "synced",
            Self::PullFailed => "pull_failed",
        })
    }
}

/// Result of one table pull
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PullStatus {
    Replaced { rows: usize },
    /// Server sent an empty list; the mirror was left alone
    KeptExisting,
    Failed { error: String },
}

impl From<ReplaceOutcome> for PullStatus {
    fn from(outcome: ReplaceOutcome) -> Self {
        match outcome {
            ReplaceOutcome::Replaced(rows) => Self::Replaced { rows },
            ReplaceOutcome::KeptExisting => Self::KeptExisting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub table: &'static str,
    #[serde(flatten)]
    pub status: PullStatus,
}

/// Summary of a drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries confirmed by the server and removed
    pub applied: usize,
    /// Entries newly marked failed
    pub failed: usize,
    /// Tables that stopped at a failed entry
    pub blocked_tables: Vec<String>,
    /// The credential was rejected; the drain halted
    pub auth_required: bool,
}

impl DrainReport {
    pub fn merge(&mut self, other: Self) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.blocked_tables.extend(other.blocked_tables);
        self.auth_required |= other.auth_required;
    }

    pub(crate) fn block(&mut self, table: &str) {
        if !self.blocked_tables.iter().any(|blocked| blocked == table) {
            self.blocked_tables.push(table.to_string());
        }
    }
}

/// Drain followed by pulls of every table left without queued entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub drain: DrainReport,
    pub pulls: Vec<PullReport>,
}

/// Outcome of an incremental catch-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CatchUp {
    /// Server history deltas were applied to the mirror
    Incremental {
        applied: usize,
        cursor: Option<i64>,
    },
    /// No cursor was stored or the history request failed; every table was pulled
    FullPull { pulls: Vec<PullReport> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn merge_accumulates() {
        let mut report = DrainReport {
            applied: 1,
            ..DrainReport::default()
        };
        report.merge(DrainReport {
            applied: 2,
            failed: 1,
            blocked_tables: vec!["jobs".to_string()],
            auth_required: true,
        });

        assert_eq!(report.applied, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.blocked_tables, vec!["jobs"]);
        assert!(report.auth_required);
    }

    #[test]
    fn catch_up_serializes_with_mode() {
        let report = CatchUp::Incremental {
            applied: 2,
            cursor: Some(9),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"mode": "incremental", "applied": 2, "cursor": 9})
        );
    }

    #[test]
    fn pull_report_serializes_flat() {
        let report = PullReport {
            table: "clients",
            status: PullStatus::Replaced { rows: 3 },
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"table": "clients", "outcome": "replaced", "rows": 3})
        );
    }
}
