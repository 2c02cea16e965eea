//! The VLAN manager.

use crate::tables::{
    fields, APP_VLAN_MEMBER_TABLE, APP_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE, CFG_VLAN_TABLE,
    LAG_PREFIX, STATE_LAG_TABLE, STATE_PORT_TABLE, STATE_VLAN_MEMBER_TABLE, STATE_VLAN_TABLE,
    VLANMGRD_DAEMON,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use switchd_cfgmgr_common::{CfgMgr, LinkCtl, TaggingMode};
use switchd_orch_common::{
    cfg_key_parts, is_state_ok, ApplyOutcome, Engine, KeyOpFieldsValues, Notification, Stores,
    StoreError, WarmRestartCoordinator, WarmRestartState,
};
use switchd_types::{AdminStatus, MacAddress, VlanId};
use tracing::{debug, error, info, warn};

pub struct VlanMgr {
    stores: Stores,
    link: Arc<dyn LinkCtl>,
    engine: Engine,
    warm: WarmRestartCoordinator,
    device_mac: MacAddress,
    /// VLAN aliases whose netdev exists.
    vlans: HashSet<String>,
    /// Port -> VLAN aliases it belongs to; a port leaving its last VLAN is
    /// detached from the bridge.
    port_vlans: HashMap<String, HashSet<String>>,
}

impl VlanMgr {
    pub fn new(
        stores: Stores,
        link: Arc<dyn LinkCtl>,
        device_mac: MacAddress,
        warm_start: bool,
    ) -> Self {
        let mut engine = Engine::new();
        engine.register_table(CFG_VLAN_TABLE);
        engine.register_table(CFG_VLAN_MEMBER_TABLE);
        let warm = if warm_start {
            WarmRestartCoordinator::new(VLANMGRD_DAEMON)
        } else {
            WarmRestartCoordinator::disabled(VLANMGRD_DAEMON)
        };
        Self {
            stores,
            link,
            engine,
            warm,
            device_mac,
            vlans: HashSet::new(),
            port_vlans: HashMap::new(),
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn warm(&self) -> &WarmRestartCoordinator {
        &self.warm
    }

    /// Bridge bootstrap plus warm-restart snapshot and initial table load.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        if let Err(e) = self.link.ensure_bridge(&self.device_mac).await {
            warn!(error = %e, "bridge bootstrap failed, continuing");
        }

        if self.warm.is_enabled() {
            self.warm.begin(self.stores.state.as_ref()).await?;
            for table in [CFG_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE] {
                self.warm
                    .snapshot_table(self.stores.cfg.as_ref(), table)
                    .await?;
            }
            self.warm.mark_restored(self.stores.state.as_ref()).await?;
        }

        for table in [CFG_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE] {
            for key in self.stores.cfg.keys(table).await? {
                if let Some(fvs) = self.stores.cfg.get(table, &key).await? {
                    self.engine.enqueue(table, [KeyOpFieldsValues::set(key, fvs)]);
                }
            }
        }
        Ok(())
    }

    pub fn enqueue(&mut self, table: &str, entry: KeyOpFieldsValues) {
        self.engine.enqueue(table, [entry]);
    }

    /// Drives pending work until nothing more retires, then advances
    /// warm-restart bookkeeping. VLANs go before members so a member's VLAN
    /// precondition can be satisfied within the same round.
    pub async fn drain(&mut self) {
        loop {
            let mut retired = 0;
            for table in [CFG_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE] {
                let batch = self.engine.take_pending(table);
                for entry in batch {
                    let outcome = if table == CFG_VLAN_TABLE {
                        self.apply_vlan(&entry).await
                    } else {
                        self.apply_member(&entry).await
                    };
                    if !outcome.is_retry() {
                        self.warm.note_applied(table, &entry.key);
                        retired += 1;
                    }
                    self.engine.complete(table, entry, outcome);
                }
            }
            if retired == 0 {
                break;
            }
        }
        if let Err(e) = self.warm.try_reconcile(self.stores.state.as_ref()).await {
            warn!(error = %e, "warm-restart reconcile failed");
        }
    }

    /// Admin-state transitions pushed by the driver adapter.
    pub async fn handle_vlan_state_notification(&mut self, note: &Notification) {
        let alias = &note.data;
        let Ok(vlan) = VlanId::from_alias(alias) else {
            warn!(alias = %alias, "vlan state notification for non-vlan key");
            return;
        };
        let Some(status) = note
            .fields
            .iter()
            .find(|(f, _)| f == fields::ADMIN_STATUS)
            .and_then(|(_, v)| v.parse::<AdminStatus>().ok())
        else {
            return;
        };
        if let Err(e) = self.link.set_link_admin(&vlan.alias(), status).await {
            warn!(vlan = %alias, error = %e, "failed to apply notified admin state");
        } else {
            info!(vlan = %alias, status = %status, "vlan admin state updated");
        }
    }

    async fn apply_vlan(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let alias = entry.key.clone();
        let vlan = match VlanId::from_alias(&alias) {
            Ok(v) => v,
            Err(_) => {
                error!(key = %alias, "malformed vlan key");
                return ApplyOutcome::Error;
            }
        };
        if entry.op.is_set() && !vlan.is_user() {
            error!(key = %alias, "vlan id outside the user range");
            return ApplyOutcome::Error;
        }

        if entry.op.is_set() {
            // During warm replay an already-ok VLAN keeps its kernel state;
            // only the store rows are refreshed.
            let replaying = self.warm.is_enabled()
                && !self.vlans.contains(&alias)
                && self.state_ok(STATE_VLAN_TABLE, &alias).await;

            if !self.vlans.contains(&alias) && !replaying {
                if let Err(e) = self.link.add_vlan_netdev(vlan, &self.device_mac).await {
                    warn!(vlan = %alias, error = %e, "vlan netdev creation failed");
                    return ApplyOutcome::Retry;
                }
            }
            self.vlans.insert(alias.clone());

            for (field, value) in &entry.fvs {
                let applied = match field.as_str() {
                    fields::ADMIN_STATUS => match value.parse::<AdminStatus>() {
                        Ok(status) if !replaying => {
                            self.link.set_link_admin(&alias, status).await.is_ok()
                        }
                        Ok(_) => true,
                        Err(_) => {
                            warn!(vlan = %alias, value, "bad admin status");
                            true
                        }
                    },
                    fields::MTU => match value.parse::<u32>() {
                        Ok(mtu) if !replaying => {
                            // Member MTU constraints can make this fail;
                            // tolerated, the field still lands in the app row.
                            if self.link.set_link_mtu(&alias, mtu).await.is_err() {
                                warn!(vlan = %alias, mtu, "mtu not applied");
                            }
                            true
                        }
                        Ok(_) => true,
                        Err(_) => {
                            warn!(vlan = %alias, value, "bad mtu");
                            true
                        }
                    },
                    fields::MAC => match value.parse::<MacAddress>() {
                        Ok(mac) if !replaying => {
                            self.link.set_link_address(&alias, &mac).await.is_ok()
                        }
                        Ok(_) => true,
                        Err(_) => {
                            warn!(vlan = %alias, value, "bad mac");
                            true
                        }
                    },
                    fields::MEMBERS => {
                        // Inline member list: synthesise untagged member rows.
                        for port in value.split(',').filter(|p| !p.is_empty()) {
                            let member_key = format!("{alias}|{port}");
                            self.engine.enqueue(
                                CFG_VLAN_MEMBER_TABLE,
                                [KeyOpFieldsValues::set(
                                    member_key,
                                    vec![(
                                        fields::TAGGING_MODE.to_string(),
                                        "untagged".to_string(),
                                    )],
                                )],
                            );
                        }
                        true
                    }
                    other => {
                        debug!(vlan = %alias, field = other, "ignoring unknown field");
                        true
                    }
                };
                if !applied {
                    return ApplyOutcome::Retry;
                }
            }

            let app_fields: Vec<(String, String)> = entry
                .fvs
                .iter()
                .filter(|(f, _)| f != fields::MEMBERS)
                .cloned()
                .collect();
            if self
                .stores
                .app
                .set(APP_VLAN_TABLE, &alias, app_fields)
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            if self.publish_state(STATE_VLAN_TABLE, &alias).await.is_err() {
                return ApplyOutcome::Retry;
            }
            info!(vlan = %alias, "vlan applied");
            ApplyOutcome::Done
        } else {
            if self.vlans.remove(&alias) {
                if let Err(e) = self.link.del_vlan_netdev(vlan).await {
                    warn!(vlan = %alias, error = %e, "vlan netdev removal failed");
                }
            }
            for members in self.port_vlans.values_mut() {
                members.remove(&alias);
            }
            let _ = self.stores.app.del(APP_VLAN_TABLE, &alias).await;
            let _ = self.stores.state.del(STATE_VLAN_TABLE, &alias).await;
            info!(vlan = %alias, "vlan removed");
            ApplyOutcome::Done
        }
    }

    async fn apply_member(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let parts = cfg_key_parts(&entry.key);
        if parts.len() != 2 {
            error!(key = %entry.key, "malformed vlan member key");
            return ApplyOutcome::Error;
        }
        let (vlan_alias, port) = (parts[0].to_string(), parts[1].to_string());
        let vlan = match VlanId::from_alias(&vlan_alias) {
            Ok(v) => v,
            Err(_) => {
                error!(key = %entry.key, "malformed vlan member key");
                return ApplyOutcome::Error;
            }
        };

        if entry.op.is_set() {
            // Unknown tagging mode is a fatal per-item error, never retried.
            let tagging: TaggingMode = match entry
                .field_or(fields::TAGGING_MODE, "untagged")
                .parse()
            {
                Ok(mode) => mode,
                Err(_) => {
                    error!(
                        key = %entry.key,
                        mode = entry.field_or(fields::TAGGING_MODE, ""),
                        "wrong tagging mode"
                    );
                    return ApplyOutcome::Error;
                }
            };

            if !self.port_state_ok(&port).await {
                debug!(port = %port, "port not ready");
                return ApplyOutcome::Retry;
            }
            if !self.state_ok(STATE_VLAN_TABLE, &vlan_alias).await {
                debug!(vlan = %vlan_alias, "vlan not ready");
                return ApplyOutcome::Retry;
            }

            let replaying = self.warm.is_enabled()
                && self.state_ok(STATE_VLAN_MEMBER_TABLE, &entry.key).await
                && !self
                    .port_vlans
                    .get(&port)
                    .map(|v| v.contains(&vlan_alias))
                    .unwrap_or(false);

            if !replaying {
                if let Err(e) = self.link.add_bridge_vlan(&port, vlan, tagging).await {
                    // Team devices can appear a moment after their state row.
                    warn!(port = %port, vlan = %vlan_alias, error = %e, "bridge vlan add failed");
                    return ApplyOutcome::Retry;
                }
            }
            self.port_vlans
                .entry(port.clone())
                .or_default()
                .insert(vlan_alias.clone());

            let app_key = format!("{vlan_alias}:{port}");
            if self
                .stores
                .app
                .set(
                    APP_VLAN_MEMBER_TABLE,
                    &app_key,
                    vec![(
                        fields::TAGGING_MODE.to_string(),
                        tagging.as_str().to_string(),
                    )],
                )
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            if self
                .publish_state(STATE_VLAN_MEMBER_TABLE, &entry.key)
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            info!(vlan = %vlan_alias, port = %port, mode = tagging.as_str(), "member added");
            ApplyOutcome::Done
        } else {
            if let Err(e) = self.link.del_bridge_vlan(&port, vlan).await {
                warn!(port = %port, vlan = %vlan_alias, error = %e, "bridge vlan del failed");
            }
            let left_bridge = {
                let members = self.port_vlans.entry(port.clone()).or_default();
                members.remove(&vlan_alias);
                members.is_empty()
            };
            if left_bridge {
                // The port's last VLAN is gone: detach it from the bridge.
                if let Err(e) = self.link.set_link_master(&port, None).await {
                    warn!(port = %port, error = %e, "bridge detach failed");
                }
                self.port_vlans.remove(&port);
            }
            let app_key = format!("{vlan_alias}:{port}");
            let _ = self.stores.app.del(APP_VLAN_MEMBER_TABLE, &app_key).await;
            let _ = self
                .stores
                .state
                .del(STATE_VLAN_MEMBER_TABLE, &entry.key)
                .await;
            info!(vlan = %vlan_alias, port = %port, "member removed");
            ApplyOutcome::Done
        }
    }

    async fn port_state_ok(&self, port: &str) -> bool {
        let table = if port.starts_with(LAG_PREFIX) {
            STATE_LAG_TABLE
        } else {
            STATE_PORT_TABLE
        };
        self.state_ok(table, port).await
    }

    async fn state_ok(&self, table: &str, key: &str) -> bool {
        is_state_ok(self.stores.state.as_ref(), table, key)
            .await
            .unwrap_or(false)
    }

    async fn publish_state(&self, table: &str, key: &str) -> Result<(), StoreError> {
        self.stores
            .state
            .set(
                table,
                key,
                vec![(fields::STATE.to_string(), fields::STATE_OK.to_string())],
            )
            .await
    }
}

#[async_trait]
impl CfgMgr for VlanMgr {
    fn daemon_name(&self) -> &str {
        VLANMGRD_DAEMON
    }

    fn config_tables(&self) -> &[&str] {
        &[CFG_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE]
    }

    fn state_tables(&self) -> &[&str] {
        &[STATE_PORT_TABLE, STATE_LAG_TABLE, STATE_VLAN_TABLE]
    }

    fn warm_restart_state(&self) -> WarmRestartState {
        self.warm.state()
    }

    async fn drain(&mut self) {
        VlanMgr::drain(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_cfgmgr_common::{LinkCtlCall, RecordingLinkCtl};
    use switchd_orch_common::{MemStore, Store, WARM_RESTART_TABLE};

    struct Fixture {
        mgr: VlanMgr,
        cfg: MemStore,
        app: MemStore,
        state: MemStore,
        link: Arc<RecordingLinkCtl>,
    }

    fn fixture(warm: bool) -> Fixture {
        let (cfg, app, state) = (MemStore::new(), MemStore::new(), MemStore::new());
        let stores = Stores::new(
            Arc::new(cfg.clone()),
            Arc::new(app.clone()),
            Arc::new(state.clone()),
        );
        let link = Arc::new(RecordingLinkCtl::new());
        let mac: MacAddress = "52:54:00:11:22:33".parse().unwrap();
        let mgr = VlanMgr::new(stores, link.clone(), mac, warm);
        Fixture {
            mgr,
            cfg,
            app,
            state,
            link,
        }
    }

    fn fv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    async fn port_ready(fx: &Fixture, port: &str) {
        fx.state
            .set(STATE_PORT_TABLE, port, fv(&[("state", "ok")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn vlan_set_creates_netdev_and_publishes() {
        let mut fx = fixture(false);
        fx.mgr.enqueue(
            CFG_VLAN_TABLE,
            KeyOpFieldsValues::set(
                "Vlan100",
                fv(&[("admin_status", "up"), ("mtu", "9100")]),
            ),
        );
        fx.mgr.drain().await;

        let calls = fx.link.calls();
        assert!(calls.contains(&LinkCtlCall::AddVlanNetdev {
            vlan: 100,
            mac: "52:54:00:11:22:33".to_string()
        }));
        assert!(calls.contains(&LinkCtlCall::SetLinkMtu {
            alias: "Vlan100".to_string(),
            mtu: 9100
        }));
        assert_eq!(fx.app.field(APP_VLAN_TABLE, "Vlan100", "mtu"), Some("9100".into()));
        assert_eq!(
            fx.state.field(STATE_VLAN_TABLE, "Vlan100", "state"),
            Some("ok".into())
        );
    }

    /// A member arriving before its VLAN retries; once the VLAN lands both
    /// apply and the member's state row appears.
    #[tokio::test]
    async fn member_waits_for_vlan() {
        let mut fx = fixture(false);
        port_ready(&fx, "Ethernet3").await;

        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::set("Vlan100|Ethernet3", fv(&[("tagging_mode", "untagged")])),
        );
        fx.mgr.drain().await;
        assert!(!fx.state.contains(STATE_VLAN_MEMBER_TABLE, "Vlan100|Ethernet3"));
        assert_eq!(fx.mgr.engine_mut().pending_count(), 1);

        fx.mgr.enqueue(
            CFG_VLAN_TABLE,
            KeyOpFieldsValues::set("Vlan100", fv(&[("admin_status", "up")])),
        );
        fx.mgr.drain().await;

        assert_eq!(fx.mgr.engine_mut().pending_count(), 0);
        assert_eq!(
            fx.state.field(STATE_VLAN_MEMBER_TABLE, "Vlan100|Ethernet3", "state"),
            Some("ok".into())
        );
        assert!(fx.link.calls().contains(&LinkCtlCall::AddBridgeVlan {
            port: "Ethernet3".to_string(),
            vlan: 100,
            tagging: TaggingMode::Untagged,
        }));
    }

    #[tokio::test]
    async fn unknown_tagging_mode_is_fatal_per_item() {
        let mut fx = fixture(false);
        port_ready(&fx, "Ethernet3").await;
        fx.mgr.enqueue(
            CFG_VLAN_TABLE,
            KeyOpFieldsValues::set("Vlan100", fv(&[])),
        );
        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::set("Vlan100|Ethernet3", fv(&[("tagging_mode", "trunk")])),
        );
        fx.mgr.drain().await;

        // Dropped, not retried.
        assert_eq!(fx.mgr.engine_mut().pending_count(), 0);
        assert!(!fx.state.contains(STATE_VLAN_MEMBER_TABLE, "Vlan100|Ethernet3"));
    }

    /// Adding then removing a member returns the bridge to its prior state:
    /// the vlan filter is gone and the port is detached again.
    #[tokio::test]
    async fn member_round_trip_restores_bridge() {
        let mut fx = fixture(false);
        port_ready(&fx, "Ethernet3").await;
        fx.mgr.enqueue(
            CFG_VLAN_TABLE,
            KeyOpFieldsValues::set("Vlan100", fv(&[])),
        );
        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::set("Vlan100|Ethernet3", fv(&[("tagging_mode", "tagged")])),
        );
        fx.mgr.drain().await;
        fx.link.clear();

        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::del("Vlan100|Ethernet3"),
        );
        fx.mgr.drain().await;

        assert_eq!(
            fx.link.calls(),
            vec![
                LinkCtlCall::DelBridgeVlan {
                    port: "Ethernet3".to_string(),
                    vlan: 100
                },
                LinkCtlCall::SetLinkMaster {
                    alias: "Ethernet3".to_string(),
                    master: None
                },
            ]
        );
        assert!(!fx.app.contains(APP_VLAN_MEMBER_TABLE, "Vlan100:Ethernet3"));
    }

    #[tokio::test]
    async fn port_in_two_vlans_detaches_only_after_last() {
        let mut fx = fixture(false);
        port_ready(&fx, "Ethernet3").await;
        for vlan in ["Vlan100", "Vlan200"] {
            fx.mgr
                .enqueue(CFG_VLAN_TABLE, KeyOpFieldsValues::set(vlan, fv(&[])));
            fx.mgr.enqueue(
                CFG_VLAN_MEMBER_TABLE,
                KeyOpFieldsValues::set(format!("{vlan}|Ethernet3"), fv(&[])),
            );
        }
        fx.mgr.drain().await;
        fx.link.clear();

        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::del("Vlan100|Ethernet3"),
        );
        fx.mgr.drain().await;
        assert!(!fx
            .link
            .calls()
            .contains(&LinkCtlCall::SetLinkMaster {
                alias: "Ethernet3".to_string(),
                master: None
            }));

        fx.mgr.enqueue(
            CFG_VLAN_MEMBER_TABLE,
            KeyOpFieldsValues::del("Vlan200|Ethernet3"),
        );
        fx.mgr.drain().await;
        assert!(fx.link.calls().contains(&LinkCtlCall::SetLinkMaster {
            alias: "Ethernet3".to_string(),
            master: None
        }));
    }

    #[tokio::test]
    async fn inline_members_synthesise_untagged_rows() {
        let mut fx = fixture(false);
        port_ready(&fx, "Ethernet1").await;
        port_ready(&fx, "Ethernet2").await;

        fx.mgr.enqueue(
            CFG_VLAN_TABLE,
            KeyOpFieldsValues::set("Vlan300", fv(&[("members@", "Ethernet1,Ethernet2")])),
        );
        fx.mgr.drain().await;
        // Synthesised members may need a second round after the VLAN's own
        // state row lands.
        fx.mgr.drain().await;

        for port in ["Ethernet1", "Ethernet2"] {
            assert_eq!(
                fx.app
                    .field(APP_VLAN_MEMBER_TABLE, &format!("Vlan300:{port}"), "tagging_mode"),
                Some("untagged".into()),
                "{port}"
            );
        }
    }

    #[tokio::test]
    async fn vlan_out_of_user_range_is_rejected() {
        let mut fx = fixture(false);
        fx.mgr
            .enqueue(CFG_VLAN_TABLE, KeyOpFieldsValues::set("Vlan1", fv(&[])));
        fx.mgr.drain().await;
        assert!(fx.link.calls().is_empty());
        assert!(!fx.state.contains(STATE_VLAN_TABLE, "Vlan1"));
    }

    #[tokio::test]
    async fn vlan_state_notification_drives_admin() {
        let mut fx = fixture(false);
        let note = Notification {
            op: "SET".to_string(),
            data: "Vlan100".to_string(),
            fields: fv(&[("admin_status", "down")]),
        };
        fx.mgr.handle_vlan_state_notification(&note).await;
        assert!(fx.link.calls().contains(&LinkCtlCall::SetLinkAdmin {
            alias: "Vlan100".to_string(),
            status: AdminStatus::Down
        }));
    }

    /// Warm restart: entries already state-ok skip kernel mutation and only
    /// republish; the daemon reconciles once the replay set drains.
    #[tokio::test]
    async fn warm_replay_skips_kernel_mutation() {
        let cfg = MemStore::new();
        let state = MemStore::new();
        // Pre-existing config and state from the previous run.
        cfg.set(CFG_VLAN_TABLE, "Vlan100", fv(&[("mtu", "9100")]))
            .await
            .unwrap();
        state
            .set(STATE_VLAN_TABLE, "Vlan100", fv(&[("state", "ok")]))
            .await
            .unwrap();

        let app = MemStore::new();
        let stores = Stores::new(
            Arc::new(cfg.clone()),
            Arc::new(app.clone()),
            Arc::new(state.clone()),
        );
        let link = Arc::new(RecordingLinkCtl::new());
        let mac: MacAddress = "52:54:00:11:22:33".parse().unwrap();
        let mut mgr = VlanMgr::new(stores, link.clone(), mac, true);

        mgr.init().await.unwrap();
        link.clear(); // ignore bridge bootstrap
        mgr.drain().await;

        assert!(
            !link
                .calls()
                .iter()
                .any(|c| matches!(c, LinkCtlCall::AddVlanNetdev { .. })),
            "replay must not touch the kernel"
        );
        assert_eq!(
            state.field(WARM_RESTART_TABLE, "vlanmgrd", "state"),
            Some("reconciled".into())
        );
        assert_eq!(app.field(APP_VLAN_TABLE, "Vlan100", "mtu"), Some("9100".into()));
    }
}
