//! The LAG manager.

use crate::tables::{
    fields, APP_LAG_MEMBER_TABLE, APP_LAG_TABLE, APP_PORT_TABLE, CFG_LAG_MEMBER_TABLE,
    CFG_LAG_TABLE, CFG_PORT_TABLE, DEFAULT_ADMIN_STATUS, DEFAULT_MTU, STATE_LAG_TABLE,
    STATE_PORT_TABLE, TEAMMGRD_DAEMON,
};
use crate::team_ctl::TeamCtl;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use switchd_cfgmgr_common::{CfgMgr, LinkCtl};
use switchd_orch_common::{
    cfg_key_parts, is_state_ok, ApplyOutcome, Engine, KeyOpFieldsValues, Stores, StoreError,
    WarmRestartCoordinator, WarmRestartState,
};
use switchd_types::{AdminStatus, MacAddress};
use tracing::{debug, info, warn};

/// Immutable-at-create team settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TeamSettings {
    min_links: Option<u32>,
    fallback: bool,
}

pub struct TeamMgr {
    stores: Stores,
    link: Arc<dyn LinkCtl>,
    team: Arc<dyn TeamCtl>,
    engine: Engine,
    warm: WarmRestartCoordinator,
    device_mac: MacAddress,
    /// Running teams and their frozen create-time settings.
    lags: HashMap<String, TeamSettings>,
    /// LAG -> enslaved members.
    members: HashMap<String, HashSet<String>>,
}

impl TeamMgr {
    pub fn new(
        stores: Stores,
        link: Arc<dyn LinkCtl>,
        team: Arc<dyn TeamCtl>,
        device_mac: MacAddress,
        warm_start: bool,
    ) -> Self {
        let mut engine = Engine::new();
        engine.register_table(CFG_LAG_TABLE);
        engine.register_table(CFG_LAG_MEMBER_TABLE);
        let warm = if warm_start {
            WarmRestartCoordinator::new(TEAMMGRD_DAEMON)
        } else {
            WarmRestartCoordinator::disabled(TEAMMGRD_DAEMON)
        };
        Self {
            stores,
            link,
            team,
            engine,
            warm,
            device_mac,
            lags: HashMap::new(),
            members: HashMap::new(),
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Clears stale LAG readiness rows, snapshots warm-restart replay sets
    /// and loads current config.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        for key in self.stores.state.keys(STATE_LAG_TABLE).await? {
            self.stores.state.del(STATE_LAG_TABLE, &key).await?;
        }

        if self.warm.is_enabled() {
            self.warm.begin(self.stores.state.as_ref()).await?;
            for table in [CFG_LAG_TABLE, CFG_LAG_MEMBER_TABLE] {
                self.warm
                    .snapshot_table(self.stores.cfg.as_ref(), table)
                    .await?;
            }
            self.warm.mark_restored(self.stores.state.as_ref()).await?;
        }

        for table in [CFG_LAG_TABLE, CFG_LAG_MEMBER_TABLE] {
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

    /// Drives pending work until nothing more retires: a LAG landing can
    /// unblock its members, and a released member can unblock a LAG delete.
    pub async fn drain(&mut self) {
        loop {
            let mut retired = 0;
            for table in [CFG_LAG_TABLE, CFG_LAG_MEMBER_TABLE] {
                let batch = self.engine.take_pending(table);
                for entry in batch {
                    let outcome = if table == CFG_LAG_TABLE {
                        self.apply_lag(&entry).await
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

    /// A port that (re)appeared in the state table: if a LAG member config
    /// exists for it, enslave it again.
    pub async fn handle_port_state(&mut self, alias: &str) {
        let keys = match self.stores.cfg.keys(CFG_LAG_MEMBER_TABLE).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "cannot scan member config");
                return;
            }
        };
        for key in keys {
            let parts: Vec<&str> = key.split('|').collect();
            if parts.len() == 2 && parts[1] == alias {
                info!(port = alias, lag = parts[0], "re-enslaving returned port");
                self.engine
                    .enqueue(CFG_LAG_MEMBER_TABLE, [KeyOpFieldsValues::set(key, vec![])]);
                break;
            }
        }
    }

    async fn apply_lag(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let alias = entry.key.clone();
        if entry.op.is_set() {
            let min_links = entry.field(fields::MIN_LINKS).and_then(|v| v.parse().ok());
            let fallback = entry.field(fields::FALLBACK) == Some("true");
            let admin_status = entry.field_or(fields::ADMIN_STATUS, DEFAULT_ADMIN_STATUS);
            let mtu = entry.field_or(fields::MTU, DEFAULT_MTU).to_string();

            let settings = TeamSettings {
                min_links,
                fallback,
            };
            match self.lags.get(&alias) {
                None => {
                    if let Err(e) = self
                        .team
                        .start_team(&alias, &self.device_mac, min_links, fallback)
                        .await
                    {
                        warn!(lag = %alias, error = %e, "teamd start failed");
                        return ApplyOutcome::Retry;
                    }
                    self.lags.insert(alias.clone(), settings);
                }
                Some(existing) => {
                    // min_links and fallback cannot change after create.
                    if *existing != settings {
                        warn!(
                            lag = %alias,
                            "ignoring change to immutable team settings"
                        );
                    }
                }
            }

            if let Ok(status) = admin_status.parse::<AdminStatus>() {
                if let Err(e) = self.link.set_link_admin(&alias, status).await {
                    warn!(lag = %alias, error = %e, "admin status not applied");
                }
            }
            if let Err(e) = self.set_lag_mtu(&alias, &mtu).await {
                warn!(lag = %alias, error = %e, "mtu not applied");
            }

            let app_fields = vec![
                (fields::ADMIN_STATUS.to_string(), admin_status.to_string()),
                (fields::MTU.to_string(), mtu),
            ];
            if self
                .stores
                .app
                .set(APP_LAG_TABLE, &alias, app_fields)
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            if self
                .stores
                .state
                .set(
                    STATE_LAG_TABLE,
                    &alias,
                    vec![(fields::STATE.to_string(), fields::STATE_OK.to_string())],
                )
                .await
                .is_err()
            {
                return ApplyOutcome::Retry;
            }
            info!(lag = %alias, "port channel applied");
            ApplyOutcome::Done
        } else {
            if self
                .members
                .get(&alias)
                .map(|m| !m.is_empty())
                .unwrap_or(false)
            {
                debug!(lag = %alias, "members still enslaved, deferring removal");
                return ApplyOutcome::Retry;
            }
            if self.lags.remove(&alias).is_some() {
                if let Err(e) = self.team.stop_team(&alias).await {
                    warn!(lag = %alias, error = %e, "teamd stop failed");
                }
            }
            let _ = self.stores.app.del(APP_LAG_TABLE, &alias).await;
            let _ = self.stores.state.del(STATE_LAG_TABLE, &alias).await;
            info!(lag = %alias, "port channel removed");
            ApplyOutcome::Done
        }
    }

    async fn apply_member(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let parts = cfg_key_parts(&entry.key);
        if parts.len() != 2 {
            warn!(key = %entry.key, "malformed member key");
            return ApplyOutcome::Error;
        }
        let (lag, member) = (parts[0].to_string(), parts[1].to_string());

        if entry.op.is_set() {
            if !self.state_ok(STATE_PORT_TABLE, &member).await {
                debug!(port = %member, "port not ready");
                return ApplyOutcome::Retry;
            }
            if !self.state_ok(STATE_LAG_TABLE, &lag).await {
                debug!(lag = %lag, "lag not ready");
                return ApplyOutcome::Retry;
            }

            match self.add_member(&lag, &member).await {
                Ok(()) => {
                    self.members
                        .entry(lag.clone())
                        .or_default()
                        .insert(member.clone());
                    info!(lag = %lag, port = %member, "member enslaved");
                    ApplyOutcome::Done
                }
                Err(e) => {
                    warn!(lag = %lag, port = %member, error = %e, "enslave failed");
                    ApplyOutcome::Retry
                }
            }
        } else {
            if let Err(e) = self.remove_member(&lag, &member).await {
                warn!(lag = %lag, port = %member, error = %e, "release failed");
            }
            if let Some(set) = self.members.get_mut(&lag) {
                set.remove(&member);
            }
            info!(lag = %lag, port = %member, "member released");
            ApplyOutcome::Done
        }
    }

    /// Enslaves a member: teamd wants the link down first; afterwards the
    /// member's own admin status is restored and it runs at the LAG's MTU.
    async fn add_member(
        &self,
        lag: &str,
        member: &str,
    ) -> Result<(), switchd_cfgmgr_common::CfgMgrError> {
        self.link.set_link_admin(member, AdminStatus::Down).await?;
        self.team.add_port(lag, member).await?;

        let admin = self
            .cfg_field(CFG_PORT_TABLE, member, fields::ADMIN_STATUS)
            .await
            .unwrap_or_else(|| DEFAULT_ADMIN_STATUS.to_string());
        if let Ok(status) = admin.parse::<AdminStatus>() {
            self.link.set_link_admin(member, status).await?;
        }

        let mtu = self
            .cfg_field(CFG_LAG_TABLE, lag, fields::MTU)
            .await
            .unwrap_or_else(|| DEFAULT_MTU.to_string());

        let _ = self
            .stores
            .app
            .set(
                APP_PORT_TABLE,
                member,
                vec![
                    (fields::ADMIN_STATUS.to_string(), admin),
                    (fields::MTU.to_string(), mtu),
                ],
            )
            .await;
        // Both the channel and the member land in the app row so the
        // receiver can pair them by name.
        let _ = self
            .stores
            .app
            .set(
                APP_LAG_MEMBER_TABLE,
                &format!("{lag}:{member}"),
                vec![
                    (fields::LAG.to_string(), lag.to_string()),
                    (fields::STATUS.to_string(), "enabled".to_string()),
                ],
            )
            .await;
        Ok(())
    }

    /// Releases a member and puts its port-config admin status and MTU back.
    async fn remove_member(
        &self,
        lag: &str,
        member: &str,
    ) -> Result<(), switchd_cfgmgr_common::CfgMgrError> {
        self.team.remove_port(lag, member).await?;

        let admin = self
            .cfg_field(CFG_PORT_TABLE, member, fields::ADMIN_STATUS)
            .await
            .unwrap_or_else(|| DEFAULT_ADMIN_STATUS.to_string());
        let mtu = self
            .cfg_field(CFG_PORT_TABLE, member, fields::MTU)
            .await
            .unwrap_or_else(|| DEFAULT_MTU.to_string());

        if let Ok(status) = admin.parse::<AdminStatus>() {
            self.link.set_link_admin(member, status).await?;
        }
        if let Ok(mtu_value) = mtu.parse::<u32>() {
            self.link.set_link_mtu(member, mtu_value).await?;
        }

        let _ = self
            .stores
            .app
            .set(
                APP_PORT_TABLE,
                member,
                vec![
                    (fields::ADMIN_STATUS.to_string(), admin),
                    (fields::MTU.to_string(), mtu),
                ],
            )
            .await;
        let _ = self
            .stores
            .app
            .del(APP_LAG_MEMBER_TABLE, &format!("{lag}:{member}"))
            .await;
        Ok(())
    }

    /// Applies the LAG MTU and propagates it to every enslaved member's app
    /// row; enslaved links inherit it in the kernel.
    async fn set_lag_mtu(
        &self,
        lag: &str,
        mtu: &str,
    ) -> Result<(), switchd_cfgmgr_common::CfgMgrError> {
        if let Ok(mtu_value) = mtu.parse::<u32>() {
            self.link.set_link_mtu(lag, mtu_value).await?;
        }
        let keys = self.stores.cfg.keys(CFG_LAG_MEMBER_TABLE).await?;
        for key in keys {
            let parts: Vec<&str> = key.split('|').collect();
            if parts.len() == 2 && parts[0] == lag {
                let _ = self
                    .stores
                    .app
                    .set(
                        APP_PORT_TABLE,
                        parts[1],
                        vec![(fields::MTU.to_string(), mtu.to_string())],
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn cfg_field(&self, table: &str, key: &str, field: &str) -> Option<String> {
        self.stores
            .cfg
            .get(table, key)
            .await
            .ok()
            .flatten()?
            .into_iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    async fn state_ok(&self, table: &str, key: &str) -> bool {
        is_state_ok(self.stores.state.as_ref(), table, key)
            .await
            .unwrap_or(false)
    }
}

#[async_trait]
impl CfgMgr for TeamMgr {
    fn daemon_name(&self) -> &str {
        TEAMMGRD_DAEMON
    }

    fn config_tables(&self) -> &[&str] {
        &[CFG_LAG_TABLE, CFG_LAG_MEMBER_TABLE]
    }

    fn state_tables(&self) -> &[&str] {
        &[STATE_PORT_TABLE, STATE_LAG_TABLE]
    }

    fn warm_restart_state(&self) -> WarmRestartState {
        self.warm.state()
    }

    async fn drain(&mut self) {
        TeamMgr::drain(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::team_ctl::{RecordingTeamCtl, TeamCtlCall};
    use pretty_assertions::assert_eq;
    use switchd_cfgmgr_common::{LinkCtlCall, RecordingLinkCtl};
    use switchd_orch_common::{MemStore, Store};

    struct Fixture {
        mgr: TeamMgr,
        cfg: MemStore,
        app: MemStore,
        state: MemStore,
        link: Arc<RecordingLinkCtl>,
        team: Arc<RecordingTeamCtl>,
    }

    fn fixture() -> Fixture {
        let (cfg, app, state) = (MemStore::new(), MemStore::new(), MemStore::new());
        let stores = Stores::new(
            Arc::new(cfg.clone()),
            Arc::new(app.clone()),
            Arc::new(state.clone()),
        );
        let link = Arc::new(RecordingLinkCtl::new());
        let team = Arc::new(RecordingTeamCtl::new());
        let mac: MacAddress = "52:54:00:11:22:33".parse().unwrap();
        let mgr = TeamMgr::new(stores, link.clone(), team.clone(), mac, false);
        Fixture {
            mgr,
            cfg,
            app,
            state,
            link,
            team,
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
    async fn lag_create_starts_teamd_with_settings() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set(
                "PortChannel7",
                fv(&[("min_links", "2"), ("fallback", "true"), ("mtu", "9100")]),
            ),
        );
        fx.mgr.drain().await;

        assert_eq!(
            fx.team.calls()[0],
            TeamCtlCall::StartTeam {
                alias: "PortChannel7".to_string(),
                mac: "52:54:00:11:22:33".to_string(),
                min_links: Some(2),
                fallback: true,
            }
        );
        assert_eq!(
            fx.state.field(STATE_LAG_TABLE, "PortChannel7", "state"),
            Some("ok".into())
        );
        assert_eq!(
            fx.app.field(APP_LAG_TABLE, "PortChannel7", "mtu"),
            Some("9100".into())
        );
    }

    /// Scenario: PortChannel7 at MTU 9100, Ethernet3 configured at 1500.
    /// While enslaved the member runs at 9100; on release it returns to 1500.
    #[tokio::test]
    async fn member_mtu_inheritance_round_trip() {
        let mut fx = fixture();
        fx.cfg
            .set(
                CFG_PORT_TABLE,
                "Ethernet3",
                fv(&[("admin_status", "up"), ("mtu", "1500")]),
            )
            .await
            .unwrap();
        fx.cfg
            .set(CFG_LAG_TABLE, "PortChannel7", fv(&[("mtu", "9100")]))
            .await
            .unwrap();
        fx.cfg
            .set(CFG_LAG_MEMBER_TABLE, "PortChannel7|Ethernet3", fv(&[]))
            .await
            .unwrap();
        port_ready(&fx, "Ethernet3").await;

        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[("mtu", "9100")])),
        );
        fx.mgr.enqueue(
            CFG_LAG_MEMBER_TABLE,
            KeyOpFieldsValues::set("PortChannel7|Ethernet3", fv(&[])),
        );
        fx.mgr.drain().await;

        // Enslave sequence: member down, port add, member admin restored.
        let team_calls = fx.team.calls();
        assert!(team_calls.contains(&TeamCtlCall::AddPort {
            team: "PortChannel7".to_string(),
            member: "Ethernet3".to_string(),
        }));
        let link_calls = fx.link.calls();
        assert!(link_calls.contains(&LinkCtlCall::SetLinkAdmin {
            alias: "Ethernet3".to_string(),
            status: AdminStatus::Down,
        }));
        assert!(link_calls.contains(&LinkCtlCall::SetLinkAdmin {
            alias: "Ethernet3".to_string(),
            status: AdminStatus::Up,
        }));
        // Inherited MTU on the member's app row.
        assert_eq!(
            fx.app.field(APP_PORT_TABLE, "Ethernet3", "mtu"),
            Some("9100".into())
        );

        fx.link.clear();
        fx.mgr.enqueue(
            CFG_LAG_MEMBER_TABLE,
            KeyOpFieldsValues::del("PortChannel7|Ethernet3"),
        );
        fx.mgr.drain().await;

        assert!(fx.team.calls().contains(&TeamCtlCall::RemovePort {
            team: "PortChannel7".to_string(),
            member: "Ethernet3".to_string(),
        }));
        // Port-config values restored.
        assert!(fx.link.calls().contains(&LinkCtlCall::SetLinkMtu {
            alias: "Ethernet3".to_string(),
            mtu: 1500,
        }));
        assert_eq!(
            fx.app.field(APP_PORT_TABLE, "Ethernet3", "mtu"),
            Some("1500".into())
        );
    }

    #[tokio::test]
    async fn member_waits_for_port_and_lag() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_LAG_MEMBER_TABLE,
            KeyOpFieldsValues::set("PortChannel7|Ethernet3", fv(&[])),
        );
        fx.mgr.drain().await;
        assert!(fx.team.calls().is_empty());
        assert_eq!(fx.mgr.engine_mut().pending_count(), 1);

        port_ready(&fx, "Ethernet3").await;
        fx.mgr.drain().await;
        // Port ready, LAG still missing.
        assert!(fx.team.calls().is_empty());

        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[])),
        );
        fx.mgr.drain().await;
        assert!(fx.team.calls().iter().any(|c| matches!(c, TeamCtlCall::AddPort { .. })));
        assert_eq!(fx.mgr.engine_mut().pending_count(), 0);
    }

    #[tokio::test]
    async fn lag_delete_requires_no_members() {
        let mut fx = fixture();
        port_ready(&fx, "Ethernet3").await;
        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[])),
        );
        fx.mgr.enqueue(
            CFG_LAG_MEMBER_TABLE,
            KeyOpFieldsValues::set("PortChannel7|Ethernet3", fv(&[])),
        );
        fx.mgr.drain().await;

        fx.mgr
            .enqueue(CFG_LAG_TABLE, KeyOpFieldsValues::del("PortChannel7"));
        fx.mgr.drain().await;
        // Member still enslaved: removal deferred.
        assert!(!fx.team.calls().iter().any(|c| matches!(c, TeamCtlCall::StopTeam { .. })));

        fx.mgr.enqueue(
            CFG_LAG_MEMBER_TABLE,
            KeyOpFieldsValues::del("PortChannel7|Ethernet3"),
        );
        fx.mgr.drain().await;
        fx.mgr.drain().await;
        assert!(fx.team.calls().contains(&TeamCtlCall::StopTeam {
            alias: "PortChannel7".to_string()
        }));
        assert!(!fx.state.contains(STATE_LAG_TABLE, "PortChannel7"));
    }

    #[tokio::test]
    async fn immutable_settings_are_not_reapplied() {
        let mut fx = fixture();
        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[("min_links", "2")])),
        );
        fx.mgr.drain().await;
        fx.team.clear();

        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[("min_links", "4")])),
        );
        fx.mgr.drain().await;
        // No second teamd start; the change is ignored.
        assert!(!fx.team.calls().iter().any(|c| matches!(c, TeamCtlCall::StartTeam { .. })));
    }

    #[tokio::test]
    async fn returned_port_is_re_enslaved() {
        let mut fx = fixture();
        fx.cfg
            .set(CFG_LAG_MEMBER_TABLE, "PortChannel7|Ethernet3", fv(&[]))
            .await
            .unwrap();
        port_ready(&fx, "Ethernet3").await;
        fx.mgr.enqueue(
            CFG_LAG_TABLE,
            KeyOpFieldsValues::set("PortChannel7", fv(&[])),
        );
        fx.mgr.drain().await;

        fx.mgr.handle_port_state("Ethernet3").await;
        fx.mgr.drain().await;
        assert!(fx.team.calls().contains(&TeamCtlCall::AddPort {
            team: "PortChannel7".to_string(),
            member: "Ethernet3".to_string(),
        }));
    }

    #[tokio::test]
    async fn init_clears_stale_lag_state() {
        let fx = fixture();
        fx.state
            .set(STATE_LAG_TABLE, "PortChannel9", fv(&[("state", "ok")]))
            .await
            .unwrap();
        let mut mgr = fx.mgr;
        mgr.init().await.unwrap();
        assert!(!fx.state.contains(STATE_LAG_TABLE, "PortChannel9"));
    }
}
