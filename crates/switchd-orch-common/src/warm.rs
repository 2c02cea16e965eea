//! Warm-restart coordination.
//!
//! On a warm start the daemon snapshots the current keys of every table it
//! owns into replay sets, re-applies them from persisted state, and only
//! advances to `Reconciled` once every snapshotted key has been applied at
//! least once. The transition is published to the state store so peers can
//! observe it. Reconciliation is idempotent: advancing an already-reconciled
//! coordinator does nothing.

use crate::store::{Store, StoreError};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// State-store table carrying per-daemon warm-restart state.
pub const WARM_RESTART_TABLE: &str = "WARM_RESTART_TABLE";

/// Lifecycle of a warm-restarting daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmRestartState {
    Disabled,
    Initialized,
    Restored,
    Replayed,
    Reconciled,
}

impl WarmRestartState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmRestartState::Disabled => "disabled",
            WarmRestartState::Initialized => "initialized",
            WarmRestartState::Restored => "restored",
            WarmRestartState::Replayed => "replayed",
            WarmRestartState::Reconciled => "reconciled",
        }
    }
}

/// Tracks replay progress for one daemon.
pub struct WarmRestartCoordinator {
    daemon: String,
    enabled: bool,
    state: WarmRestartState,
    replay: HashMap<String, HashSet<String>>,
}

impl WarmRestartCoordinator {
    /// A coordinator for a cold-started daemon; replay gating is inert.
    pub fn disabled(daemon: impl Into<String>) -> Self {
        Self {
            daemon: daemon.into(),
            enabled: false,
            state: WarmRestartState::Disabled,
            replay: HashMap::new(),
        }
    }

    pub fn new(daemon: impl Into<String>) -> Self {
        Self {
            daemon: daemon.into(),
            enabled: true,
            state: WarmRestartState::Initialized,
            replay: HashMap::new(),
        }
    }

    pub fn daemon(&self) -> &str {
        &self.daemon
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> WarmRestartState {
        self.state
    }

    /// Publishes `Initialized`; call before snapshotting replay sets.
    /// The publish store is the state store; snapshots may come from other
    /// namespaces.
    pub async fn begin(&mut self, publish: &dyn Store) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        self.publish(publish, WarmRestartState::Initialized).await
    }

    /// Snapshots the current keys of one owned table into a replay set.
    pub async fn snapshot_table(
        &mut self,
        source: &dyn Store,
        table: &str,
    ) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        let keys: HashSet<String> = source.keys(table).await?.into_iter().collect();
        info!(
            daemon = %self.daemon,
            table,
            keys = keys.len(),
            "snapshotted replay set"
        );
        self.replay.insert(table.to_string(), keys);
        Ok(())
    }

    /// Publishes `Restored`; call once every replay set is snapshotted.
    pub async fn mark_restored(&mut self, publish: &dyn Store) -> Result<(), StoreError> {
        if !self.enabled {
            return Ok(());
        }
        self.publish(publish, WarmRestartState::Restored).await
    }

    /// Records that a key was re-applied during replay.
    pub fn note_applied(&mut self, table: &str, key: &str) {
        if let Some(set) = self.replay.get_mut(table) {
            set.remove(key);
        }
    }

    pub fn is_replay_done(&self) -> bool {
        self.replay.values().all(HashSet::is_empty)
    }

    /// Number of keys still awaiting replay.
    pub fn outstanding(&self) -> usize {
        self.replay.values().map(HashSet::len).sum()
    }

    /// Advances `Replayed -> Reconciled` once the replay sets drain.
    ///
    /// Returns true if the daemon is (now or already) reconciled. Safe to
    /// call on every wake.
    pub async fn try_reconcile(&mut self, store: &dyn Store) -> Result<bool, StoreError> {
        if !self.enabled {
            return Ok(false);
        }
        if self.state == WarmRestartState::Reconciled {
            return Ok(true);
        }
        if !self.is_replay_done() {
            return Ok(false);
        }
        self.publish(store, WarmRestartState::Replayed).await?;
        self.publish(store, WarmRestartState::Reconciled).await?;
        info!(daemon = %self.daemon, "warm restart reconciled");
        Ok(true)
    }

    async fn publish(
        &mut self,
        store: &dyn Store,
        state: WarmRestartState,
    ) -> Result<(), StoreError> {
        self.state = state;
        store
            .set(
                WARM_RESTART_TABLE,
                &self.daemon,
                vec![("state".to_string(), state.as_str().to_string())],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;
    use crate::store::Store;
    use pretty_assertions::assert_eq;

    async fn begin_over(
        warm: &mut WarmRestartCoordinator,
        store: &MemStore,
        tables: &[&str],
    ) {
        warm.begin(store).await.unwrap();
        for table in tables {
            warm.snapshot_table(store, table).await.unwrap();
        }
        warm.mark_restored(store).await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_requires_every_key_applied() {
        let store = MemStore::new();
        store.set("VLAN", "Vlan100", vec![]).await.unwrap();
        store.set("VLAN", "Vlan200", vec![]).await.unwrap();

        let mut warm = WarmRestartCoordinator::new("vlanmgrd");
        begin_over(&mut warm, &store, &["VLAN"]).await;
        assert_eq!(warm.state(), WarmRestartState::Restored);
        assert_eq!(warm.outstanding(), 2);

        assert!(!warm.try_reconcile(&store).await.unwrap());
        warm.note_applied("VLAN", "Vlan100");
        assert!(!warm.try_reconcile(&store).await.unwrap());
        warm.note_applied("VLAN", "Vlan200");

        assert!(warm.try_reconcile(&store).await.unwrap());
        assert_eq!(warm.state(), WarmRestartState::Reconciled);
        assert_eq!(
            store.field(WARM_RESTART_TABLE, "vlanmgrd", "state"),
            Some("reconciled".to_string())
        );
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = MemStore::new();
        let mut warm = WarmRestartCoordinator::new("vlanmgrd");
        begin_over(&mut warm, &store, &["VLAN"]).await;

        assert!(warm.try_reconcile(&store).await.unwrap());
        // Poke the published row so a second reconcile would be visible.
        store
            .set(WARM_RESTART_TABLE, "vlanmgrd", vec![("probe".into(), "1".into())])
            .await
            .unwrap();
        assert!(warm.try_reconcile(&store).await.unwrap());
        assert_eq!(
            store.field(WARM_RESTART_TABLE, "vlanmgrd", "probe"),
            Some("1".to_string())
        );
    }

    #[tokio::test]
    async fn disabled_coordinator_is_inert() {
        let store = MemStore::new();
        let mut warm = WarmRestartCoordinator::disabled("vlanmgrd");
        begin_over(&mut warm, &store, &["VLAN"]).await;
        assert!(!warm.try_reconcile(&store).await.unwrap());
        assert!(!store.contains(WARM_RESTART_TABLE, "vlanmgrd"));
    }

    #[tokio::test]
    async fn unknown_table_keys_do_not_block() {
        let store = MemStore::new();
        store.set("VLAN", "Vlan100", vec![]).await.unwrap();
        let mut warm = WarmRestartCoordinator::new("vlanmgrd");
        begin_over(&mut warm, &store, &["VLAN"]).await;

        // Applying a key that was never snapshotted is a no-op.
        warm.note_applied("VLAN", "Vlan999");
        warm.note_applied("OTHER", "k");
        assert_eq!(warm.outstanding(), 1);

        warm.note_applied("VLAN", "Vlan100");
        assert!(warm.is_replay_done());
    }
}
