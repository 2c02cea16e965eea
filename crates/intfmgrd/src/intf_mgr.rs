//! The interface manager.

use crate::tables::{
    APP_INTF_TABLE, CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE, INTFMGRD_DAEMON, LAG_PREFIX,
    STATE_LAG_TABLE, STATE_PORT_TABLE, STATE_VLAN_TABLE, STATE_VRF_TABLE, VLAN_PREFIX,
    VNET_PREFIX, VRF_PREFIX,
};
use async_trait::async_trait;
use std::sync::Arc;
use switchd_cfgmgr_common::{CfgMgr, LinkCtl};
use switchd_orch_common::{
    cfg_key_parts, is_state_ok, ApplyOutcome, Engine, KeyOpFieldsValues, Stores, StoreError,
    WarmRestartCoordinator, WarmRestartState,
};
use switchd_types::IpPrefix;
use tracing::{debug, error, info, warn};

pub struct IntfMgr {
    stores: Stores,
    link: Arc<dyn LinkCtl>,
    engine: Engine,
    warm: WarmRestartCoordinator,
}

impl IntfMgr {
    pub fn new(stores: Stores, link: Arc<dyn LinkCtl>, warm_start: bool) -> Self {
        let mut engine = Engine::new();
        engine.register_table(CFG_INTF_TABLE);
        engine.register_table(CFG_VLAN_INTF_TABLE);
        let warm = if warm_start {
            WarmRestartCoordinator::new(INTFMGRD_DAEMON)
        } else {
            WarmRestartCoordinator::disabled(INTFMGRD_DAEMON)
        };
        Self {
            stores,
            link,
            engine,
            warm,
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub async fn init(&mut self) -> Result<(), StoreError> {
        if self.warm.is_enabled() {
            self.warm.begin(self.stores.state.as_ref()).await?;
            for table in [CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE] {
                self.warm
                    .snapshot_table(self.stores.cfg.as_ref(), table)
                    .await?;
            }
            self.warm.mark_restored(self.stores.state.as_ref()).await?;
        }
        for table in [CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE] {
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

    /// Drives pending work until nothing more retires.
    pub async fn drain(&mut self) {
        loop {
            let mut retired = 0;
            for table in [CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE] {
                let batch = self.engine.take_pending(table);
                for entry in batch {
                    let outcome = self.apply(&entry).await;
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

    /// Keys are `alias` (general attributes, VRF binding) or `alias|prefix`
    /// (address binding).
    async fn apply(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let parts = cfg_key_parts(&entry.key);
        match parts.len() {
            1 => self.apply_general(parts[0], entry).await,
            2 => self.apply_address(parts[0], parts[1], entry).await,
            _ => {
                error!(key = %entry.key, "invalid interface key");
                ApplyOutcome::Error
            }
        }
    }

    async fn apply_general(&mut self, alias: &str, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let vrf_name = entry
            .field("vrf_name")
            .or_else(|| entry.field("vnet_name"))
            .unwrap_or("")
            .to_string();

        if entry.op.is_set() {
            if !self.intf_state_ok(alias).await {
                debug!(alias, "interface not ready");
                return ApplyOutcome::Retry;
            }
            if !vrf_name.is_empty() && !self.intf_state_ok(&vrf_name).await {
                debug!(vrf = %vrf_name, "vrf not ready");
                return ApplyOutcome::Retry;
            }

            // Replay of an interface already bound: app row present means the
            // kernel matches; republish only.
            let replaying =
                self.warm.is_enabled() && self.app_row_exists(alias).await;
            if !replaying {
                let master = (!vrf_name.is_empty()).then_some(vrf_name.as_str());
                if let Err(e) = self.link.set_link_master(alias, master).await {
                    warn!(alias, error = %e, "vrf rebind failed");
                    return ApplyOutcome::Retry;
                }
            }

            if self
                .stores
                .app
                .set(APP_INTF_TABLE, alias, entry.fvs.clone())
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            info!(alias, vrf = %vrf_name, "interface applied");
            ApplyOutcome::Done
        } else {
            if let Err(e) = self.link.set_link_master(alias, None).await {
                warn!(alias, error = %e, "vrf unbind failed");
            }
            let _ = self.stores.app.del(APP_INTF_TABLE, alias).await;
            info!(alias, "interface removed");
            ApplyOutcome::Done
        }
    }

    async fn apply_address(
        &mut self,
        alias: &str,
        prefix_text: &str,
        entry: &KeyOpFieldsValues,
    ) -> ApplyOutcome {
        let prefix: IpPrefix = match prefix_text.parse() {
            Ok(p) => p,
            Err(_) => {
                error!(key = %entry.key, "malformed address prefix");
                return ApplyOutcome::Error;
            }
        };
        let app_key = format!("{alias}:{prefix_text}");

        if entry.op.is_set() {
            if !self.intf_state_ok(alias).await {
                debug!(alias, "interface not ready");
                return ApplyOutcome::Retry;
            }

            let replaying =
                self.warm.is_enabled() && self.app_row_exists(&app_key).await;
            if !replaying {
                if let Err(e) = self.link.add_address(alias, &prefix).await {
                    warn!(alias, %prefix, error = %e, "address add failed");
                    return ApplyOutcome::Retry;
                }
            }

            let family = if prefix.is_ipv4() { "IPv4" } else { "IPv6" };
            let fields = vec![
                ("scope".to_string(), "global".to_string()),
                ("family".to_string(), family.to_string()),
            ];
            if self
                .stores
                .app
                .set(APP_INTF_TABLE, &app_key, fields)
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            info!(alias, %prefix, "address applied");
            ApplyOutcome::Done
        } else {
            if let Err(e) = self.link.del_address(alias, &prefix).await {
                warn!(alias, %prefix, error = %e, "address del failed");
            }
            let _ = self.stores.app.del(APP_INTF_TABLE, &app_key).await;
            info!(alias, %prefix, "address removed");
            ApplyOutcome::Done
        }
    }

    /// The state-ok table depends on the alias family: VLANs, LAGs and
    /// VRF/Vnet names each publish readiness in their own table.
    async fn intf_state_ok(&self, alias: &str) -> bool {
        let table = if alias.starts_with(VLAN_PREFIX) {
            STATE_VLAN_TABLE
        } else if alias.starts_with(LAG_PREFIX) {
            STATE_LAG_TABLE
        } else if alias.starts_with(VNET_PREFIX) || alias.starts_with(VRF_PREFIX) {
            STATE_VRF_TABLE
        } else {
            STATE_PORT_TABLE
        };
        is_state_ok(self.stores.state.as_ref(), table, alias)
            .await
            .unwrap_or(false)
    }

    async fn app_row_exists(&self, key: &str) -> bool {
        self.stores
            .app
            .get(APP_INTF_TABLE, key)
            .await
            .map(|row| row.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl CfgMgr for IntfMgr {
    fn daemon_name(&self) -> &str {
        INTFMGRD_DAEMON
    }

    fn config_tables(&self) -> &[&str] {
        &[CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE]
    }

    fn state_tables(&self) -> &[&str] {
        &[STATE_PORT_TABLE, STATE_LAG_TABLE, STATE_VLAN_TABLE, STATE_VRF_TABLE]
    }

    fn warm_restart_state(&self) -> WarmRestartState {
        self.warm.state()
    }

    async fn drain(&mut self) {
        IntfMgr::drain(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use switchd_cfgmgr_common::{LinkCtlCall, RecordingLinkCtl};
    use switchd_orch_common::{MemStore, Store};

    struct Fixture {
        mgr: IntfMgr,
        app: MemStore,
        state: MemStore,
        link: Arc<RecordingLinkCtl>,
    }

    fn fixture() -> Fixture {
        let (cfg, app, state) = (MemStore::new(), MemStore::new(), MemStore::new());
        let stores = Stores::new(
            Arc::new(cfg),
            Arc::new(app.clone()),
            Arc::new(state.clone()),
        );
        let link = Arc::new(RecordingLinkCtl::new());
        let mgr = IntfMgr::new(stores, link.clone(), false);
        Fixture {
            mgr,
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

    async fn ready(fx: &Fixture, table: &str, key: &str) {
        fx.state.set(table, key, fv(&[("state", "ok")])).await.unwrap();
    }

    #[tokio::test]
    async fn address_binding_waits_for_interface() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_INTF_TABLE,
            KeyOpFieldsValues::set("Ethernet8|10.0.0.1/31", fv(&[])),
        );
        fx.mgr.drain().await;
        assert!(fx.link.calls().is_empty());
        assert_eq!(fx.mgr.engine_mut().pending_count(), 1);

        ready(&fx, STATE_PORT_TABLE, "Ethernet8").await;
        fx.mgr.drain().await;

        assert!(fx.link.calls().contains(&LinkCtlCall::AddAddress {
            alias: "Ethernet8".to_string(),
            prefix: "10.0.0.1/31".to_string(),
        }));
        assert_eq!(
            fx.app.field(APP_INTF_TABLE, "Ethernet8:10.0.0.1/31", "family"),
            Some("IPv4".into())
        );
        assert_eq!(
            fx.app.field(APP_INTF_TABLE, "Ethernet8:10.0.0.1/31", "scope"),
            Some("global".into())
        );
    }

    #[tokio::test]
    async fn vrf_binding_requires_both_ready() {
        let mut fx = fixture();
        ready(&fx, STATE_PORT_TABLE, "Ethernet8").await;

        fx.mgr.enqueue(
            CFG_INTF_TABLE,
            KeyOpFieldsValues::set("Ethernet8", fv(&[("vrf_name", "Vrf-red")])),
        );
        fx.mgr.drain().await;
        // VRF not ready yet.
        assert!(fx.link.calls().is_empty());

        ready(&fx, STATE_VRF_TABLE, "Vrf-red").await;
        fx.mgr.drain().await;
        assert!(fx.link.calls().contains(&LinkCtlCall::SetLinkMaster {
            alias: "Ethernet8".to_string(),
            master: Some("Vrf-red".to_string()),
        }));
    }

    #[tokio::test]
    async fn general_del_unbinds_and_clears() {
        let mut fx = fixture();
        ready(&fx, STATE_PORT_TABLE, "Ethernet8").await;
        fx.mgr
            .enqueue(CFG_INTF_TABLE, KeyOpFieldsValues::set("Ethernet8", fv(&[])));
        fx.mgr.drain().await;
        fx.link.clear();

        fx.mgr
            .enqueue(CFG_INTF_TABLE, KeyOpFieldsValues::del("Ethernet8"));
        fx.mgr.drain().await;
        assert_eq!(
            fx.link.calls(),
            vec![LinkCtlCall::SetLinkMaster {
                alias: "Ethernet8".to_string(),
                master: None,
            }]
        );
        assert!(!fx.app.contains(APP_INTF_TABLE, "Ethernet8"));
    }

    #[tokio::test]
    async fn vlan_interface_checks_vlan_state() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_VLAN_INTF_TABLE,
            KeyOpFieldsValues::set("Vlan100|10.0.0.1/24", fv(&[])),
        );
        fx.mgr.drain().await;
        assert_eq!(fx.mgr.engine_mut().pending_count(), 1);

        ready(&fx, STATE_VLAN_TABLE, "Vlan100").await;
        fx.mgr.drain().await;
        assert_eq!(fx.mgr.engine_mut().pending_count(), 0);
    }

    #[tokio::test]
    async fn ipv6_addresses_use_ipv6_family() {
        let mut fx = fixture();
        ready(&fx, STATE_PORT_TABLE, "Ethernet8").await;
        fx.mgr.enqueue(
            CFG_INTF_TABLE,
            KeyOpFieldsValues::set("Ethernet8|2001:db8::1/64", fv(&[])),
        );
        fx.mgr.drain().await;
        assert_eq!(
            fx.app.field(APP_INTF_TABLE, "Ethernet8:2001:db8::1/64", "family"),
            Some("IPv6".into())
        );
    }

    #[tokio::test]
    async fn malformed_keys_are_dropped() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_INTF_TABLE,
            KeyOpFieldsValues::set("Ethernet8|bad|key", fv(&[])),
        );
        fx.mgr.enqueue(
            CFG_INTF_TABLE,
            KeyOpFieldsValues::set("Ethernet8|notaprefix", fv(&[])),
        );
        fx.mgr.drain().await;
        assert_eq!(fx.mgr.engine_mut().pending_count(), 0);
        assert!(fx.link.calls().is_empty());
    }
}
