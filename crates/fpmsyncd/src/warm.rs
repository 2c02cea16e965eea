//! Warm-restart reconciliation for the route sync.
//!
//! While the routing daemon replays its RIB after a restart, writes are
//! buffered instead of applied. Reconciliation then diffs the replayed set
//! against what the store restored: changed rows are written, vanished rows
//! are deleted, identical rows are left alone.

use std::collections::HashMap;
use switchd_orch_common::{FieldValues, Store, StoreError};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperState {
    /// Cold start; writes pass straight through.
    Inactive,
    /// Restored rows loaded, replay in progress, writes buffered.
    Restored,
    /// Delta applied; back to pass-through.
    Reconciled,
}

type TableKey = (String, String);

pub struct WarmStartHelper {
    state: HelperState,
    restored: HashMap<TableKey, FieldValues>,
    /// Replayed writes in arrival order; `None` fields mean delete.
    buffered: Vec<(String, String, Option<FieldValues>)>,
}

impl Default for WarmStartHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmStartHelper {
    pub fn new() -> Self {
        Self {
            state: HelperState::Inactive,
            restored: HashMap::new(),
            buffered: Vec::new(),
        }
    }

    pub fn state(&self) -> HelperState {
        self.state
    }

    /// True while writes should be buffered instead of applied.
    pub fn in_progress(&self) -> bool {
        self.state == HelperState::Restored
    }

    /// Loads the restored rows of the given tables and starts buffering.
    pub async fn load(
        &mut self,
        store: &dyn Store,
        tables: &[&str],
    ) -> Result<(), StoreError> {
        for table in tables {
            for key in store.keys(table).await? {
                if let Some(fields) = store.get(table, &key).await? {
                    self.restored
                        .insert((table.to_string(), key), fields);
                }
            }
        }
        self.state = HelperState::Restored;
        info!(restored = self.restored.len(), "warm helper loaded restored routes");
        Ok(())
    }

    /// Buffers one replayed write; `None` is a delete.
    pub fn buffer(&mut self, table: &str, key: &str, fields: Option<FieldValues>) {
        self.buffered
            .push((table.to_string(), key.to_string(), fields));
    }

    pub fn buffered_count(&self) -> usize {
        self.buffered.len()
    }

    /// Applies the delta between the replayed and restored sets.
    ///
    /// Returns `(written, deleted)` row counts.
    pub async fn reconcile(&mut self, store: &dyn Store) -> Result<(usize, usize), StoreError> {
        // Last write per key wins.
        let mut latest: HashMap<TableKey, Option<FieldValues>> = HashMap::new();
        for (table, key, fields) in self.buffered.drain(..) {
            latest.insert((table, key), fields);
        }

        let mut written = 0;
        let mut deleted = 0;
        for ((table, key), fields) in &latest {
            match fields {
                Some(fields) => {
                    let unchanged = self
                        .restored
                        .get(&(table.clone(), key.clone()))
                        .map(|restored| same_fields(restored, fields))
                        .unwrap_or(false);
                    if !unchanged {
                        store.set(table, key, fields.clone()).await?;
                        written += 1;
                    }
                }
                None => {
                    store.del(table, key).await?;
                    deleted += 1;
                }
            }
        }

        // Restored rows the replay never mentioned are stale.
        for (table, key) in self.restored.keys() {
            if !latest.contains_key(&(table.clone(), key.clone())) {
                store.del(table, key).await?;
                deleted += 1;
            }
        }

        self.restored.clear();
        self.state = HelperState::Reconciled;
        info!(written, deleted, "warm helper reconciled");
        Ok((written, deleted))
    }
}

fn same_fields(a: &FieldValues, b: &FieldValues) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.clone();
    let mut b_sorted = b.clone();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_orch_common::MemStore;

    fn fv(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn reconcile_applies_only_the_delta() {
        let store = MemStore::new();
        store
            .set("ROUTE_TABLE", "10.0.0.0/24", fv(&[("nexthop", "10.0.0.1")]))
            .await
            .unwrap();
        store
            .set("ROUTE_TABLE", "10.0.1.0/24", fv(&[("nexthop", "10.0.0.1")]))
            .await
            .unwrap();
        store
            .set("ROUTE_TABLE", "10.0.2.0/24", fv(&[("nexthop", "10.0.0.9")]))
            .await
            .unwrap();

        let mut helper = WarmStartHelper::new();
        helper.load(&store, &["ROUTE_TABLE"]).await.unwrap();
        assert!(helper.in_progress());

        // Replay: first unchanged, second changed, third absent, fourth new.
        helper.buffer("ROUTE_TABLE", "10.0.0.0/24", Some(fv(&[("nexthop", "10.0.0.1")])));
        helper.buffer("ROUTE_TABLE", "10.0.1.0/24", Some(fv(&[("nexthop", "10.0.0.2")])));
        helper.buffer("ROUTE_TABLE", "10.0.3.0/24", Some(fv(&[("nexthop", "10.0.0.3")])));

        let (written, deleted) = helper.reconcile(&store).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(deleted, 1);
        assert_eq!(helper.state(), HelperState::Reconciled);

        assert_eq!(
            store.field("ROUTE_TABLE", "10.0.1.0/24", "nexthop"),
            Some("10.0.0.2".to_string())
        );
        assert!(store.contains("ROUTE_TABLE", "10.0.3.0/24"));
        assert!(!store.contains("ROUTE_TABLE", "10.0.2.0/24"));
    }

    #[tokio::test]
    async fn buffered_delete_wins_over_earlier_set() {
        let store = MemStore::new();
        let mut helper = WarmStartHelper::new();
        helper.load(&store, &["ROUTE_TABLE"]).await.unwrap();

        helper.buffer("ROUTE_TABLE", "10.0.0.0/24", Some(fv(&[("nexthop", "10.0.0.1")])));
        helper.buffer("ROUTE_TABLE", "10.0.0.0/24", None);
        helper.reconcile(&store).await.unwrap();

        assert!(!store.contains("ROUTE_TABLE", "10.0.0.0/24"));
    }

    #[tokio::test]
    async fn inactive_helper_never_buffers() {
        let helper = WarmStartHelper::new();
        assert!(!helper.in_progress());
        assert_eq!(helper.state(), HelperState::Inactive);
    }

    #[test]
    fn field_comparison_ignores_order() {
        assert!(same_fields(
            &fv(&[("a", "1"), ("b", "2")]),
            &fv(&[("b", "2"), ("a", "1")])
        ));
        assert!(!same_fields(&fv(&[("a", "1")]), &fv(&[("a", "2")])));
    }
}
