//! Driver-failure error DB.
//!
//! Driver-layer failures are captured per object table and key with the
//! failed operation and return code. A later success for the same key clears
//! the row. Applications subscribe to per-table channels to hear about new
//! rows; `FLUSH_ERROR_DB` wipes everything on request.

use crate::consumer::FieldValues;
use crate::store::{Store, StoreError};
use std::collections::HashMap;
use tracing::info;

/// Channel on which the driver-facing side reports call failures.
pub const CHANNEL_ERROR_NOTIFICATIONS: &str = "ERROR_NOTIFICATIONS";

/// Channel requesting a flush of all error rows.
pub const CHANNEL_FLUSH_ERROR_DB: &str = "FLUSH_ERROR_DB";

fn error_table(app_table: &str) -> String {
    format!("ERROR_{app_table}")
}

fn error_channel(app_table: &str) -> String {
    format!("ERROR_{app_table}_CHANNEL")
}

/// Error rows for a fixed set of application tables.
pub struct ErrorDb {
    tables: Vec<String>,
}

impl ErrorDb {
    pub fn new(app_tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tables: app_tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn covers(&self, app_table: &str) -> bool {
        self.tables.iter().any(|t| t == app_table)
    }

    /// Records a driver failure row and notifies the table's channel.
    pub async fn record_failure(
        &self,
        store: &dyn Store,
        app_table: &str,
        key: &str,
        operation: &str,
        rc: i32,
    ) -> Result<(), StoreError> {
        if !self.covers(app_table) {
            return Ok(());
        }
        let fields: FieldValues = vec![
            ("operation".to_string(), operation.to_string()),
            ("rc".to_string(), rc.to_string()),
            ("timestamp".to_string(), chrono::Utc::now().to_rfc3339()),
        ];
        store
            .set(&error_table(app_table), key, fields.clone())
            .await?;
        store
            .notify(&error_channel(app_table), "SET", key, fields)
            .await
    }

    /// Clears the row for a key that has since succeeded.
    pub async fn record_success(
        &self,
        store: &dyn Store,
        app_table: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        if !self.covers(app_table) {
            return Ok(());
        }
        store.del(&error_table(app_table), key).await
    }

    /// Drops every row of every covered table.
    pub async fn flush(&self, store: &dyn Store) -> Result<(), StoreError> {
        for app_table in &self.tables {
            let table = error_table(app_table);
            for key in store.keys(&table).await? {
                store.del(&table, &key).await?;
            }
            info!(table = %table, "flushed error rows");
        }
        Ok(())
    }
}

/// Which way a driver failure goes: one free retry, then the error DB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryOnce,
    Escalate,
}

/// Per-key failure counting behind the retry-once policy.
#[derive(Default)]
pub struct FailureTracker {
    counts: HashMap<(String, String), u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notes a failure; the first for a key earns a retry, later ones
    /// escalate.
    pub fn note_failure(&mut self, table: &str, key: &str) -> FailureDisposition {
        let count = self
            .counts
            .entry((table.to_string(), key.to_string()))
            .or_insert(0);
        *count += 1;
        if *count == 1 {
            FailureDisposition::RetryOnce
        } else {
            FailureDisposition::Escalate
        }
    }

    /// Clears the failure history after a success.
    pub fn note_success(&mut self, table: &str, key: &str) {
        self.counts.remove(&(table.to_string(), key.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn failure_row_lifecycle() {
        let store = MemStore::new();
        let db = ErrorDb::new(["ROUTE_TABLE"]);
        let mut sub = store
            .consume_notifications("ERROR_ROUTE_TABLE_CHANNEL")
            .await
            .unwrap();

        db.record_failure(&store, "ROUTE_TABLE", "10.0.0.0/24", "create", -2)
            .await
            .unwrap();
        assert_eq!(
            store.field("ERROR_ROUTE_TABLE", "10.0.0.0/24", "rc"),
            Some("-2".to_string())
        );
        assert_eq!(sub.recv().await.unwrap().data, "10.0.0.0/24");

        db.record_success(&store, "ROUTE_TABLE", "10.0.0.0/24")
            .await
            .unwrap();
        assert!(!store.contains("ERROR_ROUTE_TABLE", "10.0.0.0/24"));
    }

    #[tokio::test]
    async fn uncovered_tables_are_ignored() {
        let store = MemStore::new();
        let db = ErrorDb::new(["ROUTE_TABLE"]);
        db.record_failure(&store, "NEIGH_TABLE", "k", "set", -1)
            .await
            .unwrap();
        assert!(!store.contains("ERROR_NEIGH_TABLE", "k"));
    }

    #[tokio::test]
    async fn flush_clears_rows() {
        let store = MemStore::new();
        let db = ErrorDb::new(["ROUTE_TABLE"]);
        db.record_failure(&store, "ROUTE_TABLE", "a", "set", -1)
            .await
            .unwrap();
        db.record_failure(&store, "ROUTE_TABLE", "b", "set", -1)
            .await
            .unwrap();

        db.flush(&store).await.unwrap();
        assert!(store.keys("ERROR_ROUTE_TABLE").await.unwrap().is_empty());
    }

    #[test]
    fn retry_once_then_escalate() {
        let mut tracker = FailureTracker::new();
        assert_eq!(
            tracker.note_failure("ROUTE_TABLE", "k"),
            FailureDisposition::RetryOnce
        );
        assert_eq!(
            tracker.note_failure("ROUTE_TABLE", "k"),
            FailureDisposition::Escalate
        );

        tracker.note_success("ROUTE_TABLE", "k");
        assert_eq!(
            tracker.note_failure("ROUTE_TABLE", "k"),
            FailureDisposition::RetryOnce
        );
    }
}
