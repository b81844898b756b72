//! Per-table serialization of pulls and drains

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One async lock per entity table. Different tables never contend.
#[derive(Debug, Default)]
pub struct TableLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `table`.
    pub async fn acquire(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(table.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn same_table_is_exclusive() {
        let locks = TableLocks::new();
        let guard = locks.acquire("clients").await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("clients")).await;
        assert!(blocked.is_err());

        drop(guard);
        let _again = locks.acquire("clients").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn different_tables_do_not_contend() {
        let locks = TableLocks::new();
        let _clients = locks.acquire("clients").await;

        let jobs = tokio::time::timeout(Duration::from_millis(50), locks.acquire("jobs")).await;
        assert!(jobs.is_ok());
    }
}
