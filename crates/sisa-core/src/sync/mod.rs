//! Reconciliation protocol: pulls server collections into the mirror and
//! drains the sync queue against the remote API.

mod error;
mod locks;
mod reconciler;
mod report;

pub use error::{SyncError, SyncResult};
pub use locks::TableLocks;
pub use reconciler::Reconciler;
pub use report::{CatchUp, DrainReport, PullReport, PullStatus, SyncReport, TableSyncState};
