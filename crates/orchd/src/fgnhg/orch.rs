//! The fine-grained ECMP orchestrator.
//!
//! Invariants maintained across every membership change:
//!
//! 1. Bank ranges partition `[0, real_bucket_size)`.
//! 2. Every bucket holds exactly one member.
//! 3. In an active bank each live member holds a fair share of the range:
//!    `floor(r/n)` or `ceil(r/n)` buckets, with exactly `r mod n` members on
//!    the higher count.
//! 4. Only buckets whose membership actually changes are rewritten; there is
//!    no bulk re-program.
//!
//! When a bank loses its last live member its range is filled round-robin
//! from a donor bank, remembered in `inactive_to_active`, and handed back
//! when members return.

use crate::fgnhg::types::{
    BankMemberChanges, FgMatchMode, FgNextHopInfo, FgNhgEntry, FgRouteEntry,
};
use crate::neighbor::NeighborTable;
use crate::nexthop::{NextHopGroupKey, NextHopKey};
use crate::tables::{
    APP_ROUTE_TABLE, CFG_FG_NHG_MEMBER_TABLE, CFG_FG_NHG_PREFIX_TABLE, CFG_FG_NHG_TABLE,
    STATE_FG_ROUTE_TABLE,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchd_asic::{AsicAdapter, NextHopOid, NhGroupKind, NhGroupMemberOid, Platform};
use switchd_orch_common::{
    ApplyOutcome, Engine, FieldValues, KeyOpFieldsValues, Store, StoreError, TaskError,
};
use switchd_types::{IpAddress, IpPrefix};
use tracing::{error, info, warn};

/// Buffered warm-restart rows: bucket index -> next-hop textual key.
type StateWrites = Vec<(u32, String)>;

/// Shared view of plain (non-fine-grained) synced routes, maintained by the
/// daemon's route dispatch.
pub type SyncedRouteView = Arc<Mutex<HashMap<IpPrefix, NextHopGroupKey>>>;

pub struct FgNhgOrch {
    engine: Engine,
    /// App store: plain-route rows during prefix migration.
    app: Arc<dyn Store>,
    /// State store: per-bucket warm-restart rows.
    state: Arc<dyn Store>,
    asic: Arc<dyn AsicAdapter>,
    neighbors: Arc<Mutex<NeighborTable>>,
    routes_view: SyncedRouteView,

    groups: HashMap<String, FgNhgEntry>,
    /// Route-based match: prefix -> group name.
    prefix_index: HashMap<IpPrefix, String>,
    /// Nexthop-based match: member ip -> group name.
    nexthop_index: HashMap<IpAddress, String>,
    routes: HashMap<IpPrefix, FgRouteEntry>,

    /// Warm-restart recovery: prefix string -> bucket index -> nh key text.
    recovery: HashMap<String, Vec<String>>,

    /// Two-phase prefix migration caches (plain route <-> fine-grained).
    prefix_add_cache: HashMap<IpPrefix, NextHopGroupKey>,
    prefix_del_cache: HashMap<IpPrefix, NextHopGroupKey>,

    /// Port alias -> oper up, fed by port state events.
    port_oper: HashMap<String, bool>,

    fine_grained_configured: bool,
}

impl FgNhgOrch {
    pub fn new(
        app: Arc<dyn Store>,
        state: Arc<dyn Store>,
        asic: Arc<dyn AsicAdapter>,
        neighbors: Arc<Mutex<NeighborTable>>,
        routes_view: SyncedRouteView,
    ) -> Self {
        let mut engine = Engine::new();
        engine.register_table(CFG_FG_NHG_TABLE);
        engine.register_table(CFG_FG_NHG_PREFIX_TABLE);
        engine.register_table(CFG_FG_NHG_MEMBER_TABLE);
        Self {
            engine,
            app,
            state,
            asic,
            neighbors,
            routes_view,
            groups: HashMap::new(),
            prefix_index: HashMap::new(),
            nexthop_index: HashMap::new(),
            routes: HashMap::new(),
            recovery: HashMap::new(),
            prefix_add_cache: HashMap::new(),
            prefix_del_cache: HashMap::new(),
            port_oper: HashMap::new(),
            fine_grained_configured: false,
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn is_configured(&self) -> bool {
        self.fine_grained_configured
    }

    /// Loads persisted bucket maps so the next route create replays them
    /// instead of choosing buckets round-robin.
    pub async fn bake(&mut self) -> Result<(), StoreError> {
        let keys = self.state.keys(STATE_FG_ROUTE_TABLE).await?;
        info!(entries = keys.len(), "recovering fine-grained routes from state");
        for key in keys {
            let fields = self
                .state
                .get(STATE_FG_ROUTE_TABLE, &key)
                .await?
                .unwrap_or_default();
            let mut map: Vec<String> = Vec::new();
            for (field, value) in &fields {
                if let Ok(index) = field.parse::<usize>() {
                    if index >= map.len() {
                        map.resize(index + 1, String::new());
                    }
                    map[index] = value.clone();
                }
            }
            self.recovery.insert(key.clone(), map);
            self.state.del(STATE_FG_ROUTE_TABLE, &key).await?;
        }
        Ok(())
    }

    /// Drives all pending config-table work once. Returns the
    /// `(table, key)` pairs retired this round, for replay tracking.
    pub async fn drain(&mut self) -> Vec<(String, String)> {
        let mut retired = Vec::new();
        for table in [
            CFG_FG_NHG_TABLE,
            CFG_FG_NHG_PREFIX_TABLE,
            CFG_FG_NHG_MEMBER_TABLE,
        ] {
            let batch = self.engine.take_pending(table);
            for entry in batch {
                let outcome = match table {
                    CFG_FG_NHG_TABLE => self.apply_fg_nhg(&entry).await,
                    CFG_FG_NHG_PREFIX_TABLE => self.apply_fg_nhg_prefix(&entry).await,
                    _ => self.apply_fg_nhg_member(&entry).await,
                };
                if !outcome.is_retry() {
                    retired.push((table.to_string(), entry.key.clone()));
                }
                self.engine.complete(table, entry, outcome);
            }
        }
        retired
    }

    // ------------------------------------------------------------------
    // Route entry points (called from route dispatch)
    // ------------------------------------------------------------------

    /// True when a route belongs to this orchestrator: its prefix is bound,
    /// or every next hop is a member of one nexthop-based group.
    pub fn is_route_fine_grained(&self, prefix: &IpPrefix, nhg_key: &NextHopGroupKey) -> bool {
        if !self.fine_grained_configured {
            return false;
        }
        if self.prefix_index.contains_key(prefix) {
            return true;
        }
        let mut seen_group: Option<&String> = None;
        for nh in nhg_key.next_hops() {
            match self.nexthop_index.get(&nh.ip) {
                None => {
                    if seen_group.is_some() {
                        warn!(
                            %prefix,
                            nh = %nh,
                            "route mixes fine-grained and plain next hops, defaulting to plain ECMP"
                        );
                    }
                    return false;
                }
                Some(name) => match seen_group {
                    None => seen_group = Some(name),
                    Some(prev) if prev != name => {
                        info!(nh = %nh, "next hops span different fine-grained groups");
                        return false;
                    }
                    _ => {}
                },
            }
        }
        seen_group.is_some()
    }

    pub fn has_route(&self, prefix: &IpPrefix) -> bool {
        self.routes.contains_key(prefix)
    }

    pub fn route_group_id(&self, prefix: &IpPrefix) -> Option<switchd_asic::NhGroupOid> {
        self.routes.get(prefix).map(|r| r.group_id)
    }

    /// Binds or updates a fine-grained route. Returns the driver group id.
    pub async fn set_route(
        &mut self,
        prefix: IpPrefix,
        nhg_key: NextHopGroupKey,
    ) -> Result<switchd_asic::NhGroupOid, TaskError> {
        let mut writes = StateWrites::new();
        let result = self.set_route_sync(&prefix, &nhg_key, &mut writes);
        self.flush_state_writes(&prefix, writes).await;
        result
    }

    /// Unbinds a fine-grained route, releasing driver and state rows.
    pub async fn remove_route(&mut self, prefix: IpPrefix) -> Result<(), TaskError> {
        if !self.fine_grained_configured {
            return Ok(());
        }
        let Some(route) = self.routes.get(&prefix) else {
            return Ok(());
        };
        remove_fine_grained_group(self.asic.as_ref(), route)?;
        {
            let mut neighbors = self.neighbors.lock().unwrap();
            for nh in &route.active_nexthops {
                neighbors.decrease_ref(nh);
            }
        }
        self.routes.remove(&prefix);
        if self
            .state
            .del(STATE_FG_ROUTE_TABLE, &prefix.to_string())
            .await
            .is_err()
        {
            warn!(%prefix, "failed to clear warm-restart rows");
        }
        info!(%prefix, "removed fine-grained route");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Link and neighbor transitions
    // ------------------------------------------------------------------

    /// Reacts to a port oper-state change: flips the link state of every
    /// member tracking this link and revalidates them.
    pub async fn handle_port_oper(&mut self, alias: &str, oper_up: bool) {
        self.port_oper.insert(alias.to_string(), oper_up);

        let mut touched: Vec<IpAddress> = Vec::new();
        for entry in self.groups.values_mut() {
            let Some(ips) = entry.links.get(alias).cloned() else {
                continue;
            };
            for ip in ips {
                match entry.next_hops.get_mut(&ip) {
                    Some(info) => {
                        info.link_up = oper_up;
                        touched.push(ip);
                    }
                    None => warn!(%ip, link = alias, "link map out of sync with members"),
                }
            }
        }

        for ip in touched {
            let nhk = {
                let neighbors = self.neighbors.lock().unwrap();
                neighbors.next_hop_by_ip(&ip)
            };
            let Some(nhk) = nhk else { continue };
            let result = if oper_up {
                self.valid_next_hop(&nhk).await
            } else {
                self.invalid_next_hop(&nhk).await
            };
            if let Err(e) = result {
                warn!(nh = %nhk, error = %e, "failed to apply link transition");
            }
        }
    }

    /// A next hop became usable: give it buckets in every group that
    /// contains it.
    pub async fn valid_next_hop(&mut self, nhk: &NextHopKey) -> Result<(), TaskError> {
        let prefixes: Vec<IpPrefix> = self
            .routes
            .iter()
            .filter(|(_, route)| route.nhg_key.contains(nhk))
            .map(|(prefix, _)| *prefix)
            .collect();

        for prefix in prefixes {
            let name = match self.group_name_for(&prefix, &nhk.ip) {
                Some(name) => name,
                None => {
                    error!(nh = %nhk, "next hop became valid in a non-configured group");
                    return Err(TaskError::malformed("unknown fine-grained group"));
                }
            };
            let entry = self.groups.remove(&name).expect("indexed group exists");
            let mut route = self.routes.remove(&prefix).expect("prefix collected above");

            if route.active_nexthops.contains(nhk) {
                self.groups.insert(name, entry);
                self.routes.insert(prefix, route);
                return Ok(());
            }

            let Some(member_bank) = entry.next_hops.get(&nhk.ip).map(|i| i.bank as usize) else {
                self.groups.insert(name, entry);
                self.routes.insert(prefix, route);
                continue;
            };
            let mut changes = vec![BankMemberChanges::default(); entry.bank_ranges.len()];
            let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();
            {
                let neighbors = self.neighbors.lock().unwrap();
                for active in &route.active_nexthops {
                    let bank = entry
                        .next_hops
                        .get(&active.ip)
                        .map(|i| i.bank as usize)
                        .unwrap_or(0);
                    changes[bank].active_nhs.push(active.clone());
                    nh_oids.insert(
                        active.clone(),
                        neighbors.next_hop_id(active).unwrap_or(NextHopOid::NULL),
                    );
                }
                changes[member_bank].nhs_to_add.push(nhk.clone());
                nh_oids.insert(
                    nhk.clone(),
                    neighbors.next_hop_id(nhk).unwrap_or(NextHopOid::NULL),
                );
            }

            let mut writes = StateWrites::new();
            let result = compute_and_set_changes(
                self.asic.as_ref(),
                &mut route,
                &entry,
                &changes,
                &nh_oids,
                &mut writes,
            );
            self.groups.insert(name, entry);
            self.routes.insert(prefix, route);
            self.flush_state_writes(&prefix, writes).await;
            result?;

            self.neighbors.lock().unwrap().increase_ref(nhk);
            info!(nh = %nhk, %prefix, "fine-grained next hop is up");
        }
        Ok(())
    }

    /// A next hop became unusable: move its buckets to live members in every
    /// group that contains it.
    pub async fn invalid_next_hop(&mut self, nhk: &NextHopKey) -> Result<(), TaskError> {
        let prefixes: Vec<IpPrefix> = self
            .routes
            .iter()
            .filter(|(_, route)| route.nhg_key.contains(nhk))
            .map(|(prefix, _)| *prefix)
            .collect();

        for prefix in prefixes {
            let name = match self.group_name_for(&prefix, &nhk.ip) {
                Some(name) => name,
                None => {
                    error!(nh = %nhk, "next hop became invalid in a non-configured group");
                    return Err(TaskError::malformed("unknown fine-grained group"));
                }
            };
            let entry = self.groups.remove(&name).expect("indexed group exists");
            let mut route = self.routes.remove(&prefix).expect("prefix collected above");

            if !route.active_nexthops.contains(nhk) {
                self.groups.insert(name, entry);
                self.routes.insert(prefix, route);
                return Ok(());
            }

            let Some(member_bank) = entry.next_hops.get(&nhk.ip).map(|i| i.bank as usize) else {
                self.groups.insert(name, entry);
                self.routes.insert(prefix, route);
                continue;
            };
            let mut changes = vec![BankMemberChanges::default(); entry.bank_ranges.len()];
            let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();
            {
                let neighbors = self.neighbors.lock().unwrap();
                for active in &route.active_nexthops {
                    if active.ip == nhk.ip && active.alias == nhk.alias {
                        continue;
                    }
                    let bank = entry
                        .next_hops
                        .get(&active.ip)
                        .map(|i| i.bank as usize)
                        .unwrap_or(0);
                    changes[bank].active_nhs.push(active.clone());
                    nh_oids.insert(
                        active.clone(),
                        neighbors.next_hop_id(active).unwrap_or(NextHopOid::NULL),
                    );
                }
                changes[member_bank].nhs_to_del.push(nhk.clone());
            }

            let mut writes = StateWrites::new();
            let result = compute_and_set_changes(
                self.asic.as_ref(),
                &mut route,
                &entry,
                &changes,
                &nh_oids,
                &mut writes,
            );
            self.groups.insert(name, entry);
            self.routes.insert(prefix, route);
            self.flush_state_writes(&prefix, writes).await;
            result?;

            self.neighbors.lock().unwrap().decrease_ref(nhk);
            info!(nh = %nhk, %prefix, "fine-grained next hop is down");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Config table handlers
    // ------------------------------------------------------------------

    async fn apply_fg_nhg(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let name = entry.key.clone();
        if entry.op.is_set() {
            let bucket_size: u32 = entry
                .field("bucket_size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if bucket_size == 0 {
                error!(group = %name, "bucket_size missing or zero");
                return ApplyOutcome::Error;
            }
            let match_mode = match entry.field("match_mode") {
                Some("nexthop-based") => FgMatchMode::NexthopBased,
                Some("route-based") | None => FgMatchMode::RouteBased,
                Some(other) => {
                    warn!(group = %name, mode = other, "unsupported match_mode, using route-based");
                    FgMatchMode::RouteBased
                }
            };
            if self.groups.contains_key(&name) {
                warn!(group = %name, "group already exists, ignoring");
                return ApplyOutcome::Done;
            }
            info!(group = %name, bucket_size, "added fine-grained group");
            self.groups
                .insert(name.clone(), FgNhgEntry::new(name, bucket_size, match_mode));
            self.fine_grained_configured = true;
            ApplyOutcome::Done
        } else {
            match self.groups.get(&name) {
                None => {
                    info!(group = %name, "delete for unknown group");
                    ApplyOutcome::Done
                }
                Some(group) => {
                    if !group.prefixes.is_empty() || !group.next_hops.is_empty() {
                        info!(group = %name, "group still referenced by prefixes or members");
                        return ApplyOutcome::Retry;
                    }
                    self.groups.remove(&name);
                    if self.groups.is_empty() {
                        self.fine_grained_configured = false;
                    }
                    ApplyOutcome::Done
                }
            }
        }
    }

    async fn apply_fg_nhg_prefix(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let prefix: IpPrefix = match entry.key.parse() {
            Ok(p) => p,
            Err(_) => {
                error!(key = %entry.key, "malformed prefix key");
                return ApplyOutcome::Error;
            }
        };

        if entry.op.is_set() {
            if self.prefix_index.contains_key(&prefix) {
                return ApplyOutcome::Done;
            }
            let name = match entry.field("FG_NHG") {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => {
                    error!(%prefix, "FG_NHG field missing");
                    return ApplyOutcome::Error;
                }
            };
            let Some(group) = self.groups.get(&name) else {
                return ApplyOutcome::Retry;
            };
            if group.match_mode == FgMatchMode::NexthopBased {
                info!(group = %name, "prefix binding is a no-op for nexthop-based groups");
                return ApplyOutcome::Done;
            }

            // Migrating an already-synced plain route: delete it from the
            // app store first, re-add it once the plain path has dropped it.
            let synced = self
                .routes_view
                .lock()
                .unwrap()
                .get(&prefix)
                .cloned()
                .unwrap_or_default();
            match self.prefix_add_cache.get(&prefix) {
                None => {
                    if synced.is_empty() {
                        self.bind_prefix(&name, prefix);
                        ApplyOutcome::Done
                    } else {
                        self.prefix_add_cache.insert(prefix, synced);
                        if let Err(e) = self.app.del(APP_ROUTE_TABLE, &prefix.to_string()).await {
                            warn!(%prefix, error = %e, "route delete for migration failed");
                        }
                        ApplyOutcome::Retry
                    }
                }
                Some(cached) => {
                    if synced.is_empty() {
                        let fields = route_fields_from_group_key(cached);
                        self.bind_prefix(&name, prefix);
                        self.prefix_add_cache.remove(&prefix);
                        if let Err(e) = self
                            .app
                            .set(APP_ROUTE_TABLE, &prefix.to_string(), fields)
                            .await
                        {
                            warn!(%prefix, error = %e, "route re-add for migration failed");
                        }
                        ApplyOutcome::Done
                    } else {
                        ApplyOutcome::Retry
                    }
                }
            }
        } else {
            let Some(name) = self.prefix_index.get(&prefix).cloned() else {
                return ApplyOutcome::Done;
            };
            let synced = self
                .routes
                .get(&prefix)
                .map(|r| r.nhg_key.clone())
                .unwrap_or_default();
            match self.prefix_del_cache.get(&prefix) {
                None => {
                    if synced.is_empty() {
                        self.unbind_prefix(&name, &prefix);
                        ApplyOutcome::Done
                    } else {
                        self.prefix_del_cache.insert(prefix, synced);
                        if let Err(e) = self.app.del(APP_ROUTE_TABLE, &prefix.to_string()).await {
                            warn!(%prefix, error = %e, "route delete for unbinding failed");
                        }
                        ApplyOutcome::Retry
                    }
                }
                Some(cached) => {
                    if synced.is_empty() {
                        let fields = route_fields_from_group_key(cached);
                        self.unbind_prefix(&name, &prefix);
                        self.prefix_del_cache.remove(&prefix);
                        if let Err(e) = self
                            .app
                            .set(APP_ROUTE_TABLE, &prefix.to_string(), fields)
                            .await
                        {
                            warn!(%prefix, error = %e, "route re-add after unbinding failed");
                        }
                        ApplyOutcome::Done
                    } else {
                        ApplyOutcome::Retry
                    }
                }
            }
        }
    }

    async fn apply_fg_nhg_member(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let ip: IpAddress = match entry.key.parse() {
            Ok(ip) => ip,
            Err(_) => {
                error!(key = %entry.key, "malformed member key");
                return ApplyOutcome::Error;
            }
        };

        if entry.op.is_set() {
            let name = match entry.field("FG_NHG") {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => {
                    error!(%ip, "FG_NHG field missing");
                    return ApplyOutcome::Error;
                }
            };
            let bank: u32 = entry.field("bank").and_then(|v| v.parse().ok()).unwrap_or(0);
            let link = entry.field("link").map(str::to_string);

            let Some(group) = self.groups.get_mut(&name) else {
                return ApplyOutcome::Retry;
            };
            if group.next_hops.contains_key(&ip) {
                info!(%ip, group = %name, "member already exists");
                return ApplyOutcome::Done;
            }

            let mut info = FgNextHopInfo {
                bank,
                link: None,
                link_up: true,
            };
            if let Some(link_name) = &link {
                match self.port_oper.get(link_name) {
                    None => warn!(
                        %ip,
                        link = %link_name,
                        "member references unknown link, link mapping skipped"
                    ),
                    Some(oper_up) => {
                        info.link = Some(link_name.clone());
                        info.link_up = *oper_up;
                        group
                            .links
                            .entry(link_name.clone())
                            .or_default()
                            .push(ip);
                    }
                }
            }
            let link_usable = info.link_up;
            group.next_hops.insert(ip, info);
            let nexthop_based = group.match_mode == FgMatchMode::NexthopBased;
            if nexthop_based {
                self.nexthop_index.insert(ip, name.clone());
            }

            let nhk = {
                let neighbors = self.neighbors.lock().unwrap();
                neighbors.next_hop_by_ip(&ip)
            };
            match nhk {
                None => {
                    info!(%ip, "member next hop not resolved yet");
                }
                Some(nhk) if link_usable => {
                    if let Err(e) = self.valid_next_hop(&nhk).await {
                        warn!(nh = %nhk, error = %e, "failed to activate new member");
                        // Undo the half-applied member so a later retry
                        // starts clean.
                        if let Some(group) = self.groups.get_mut(&name) {
                            if let Some(link_name) = &link {
                                cleanup_link_map(group, link_name, &ip);
                            }
                            group.next_hops.remove(&ip);
                        }
                        self.nexthop_index.remove(&ip);
                        return ApplyOutcome::Retry;
                    }
                }
                Some(_) => {}
            }
            info!(%ip, group = %name, "fine-grained member added");
            ApplyOutcome::Done
        } else {
            let nhk = {
                let neighbors = self.neighbors.lock().unwrap();
                neighbors.next_hop_by_ip(&ip)
            };
            if let Some(nhk) = nhk {
                if let Err(e) = self.invalid_next_hop(&nhk).await {
                    warn!(nh = %nhk, error = %e, "failed to deactivate removed member");
                    return ApplyOutcome::Retry;
                }
            }
            for group in self.groups.values_mut() {
                if let Some(info) = group.next_hops.get(&ip).cloned() {
                    if let Some(link_name) = &info.link {
                        cleanup_link_map(group, link_name, &ip);
                    }
                    group.next_hops.remove(&ip);
                    info!(%ip, group = %group.name, "fine-grained member removed");
                    break;
                }
            }
            self.nexthop_index.remove(&ip);
            ApplyOutcome::Done
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn bind_prefix(&mut self, name: &str, prefix: IpPrefix) {
        if let Some(group) = self.groups.get_mut(name) {
            group.prefixes.push(prefix);
        }
        self.prefix_index.insert(prefix, name.to_string());
        info!(group = name, %prefix, "bound prefix to fine-grained group");
    }

    fn unbind_prefix(&mut self, name: &str, prefix: &IpPrefix) {
        if let Some(group) = self.groups.get_mut(name) {
            group.prefixes.retain(|p| p != prefix);
        }
        self.prefix_index.remove(prefix);
        info!(group = name, %prefix, "unbound prefix from fine-grained group");
    }

    fn group_name_for(&self, prefix: &IpPrefix, ip: &IpAddress) -> Option<String> {
        self.prefix_index
            .get(prefix)
            .or_else(|| self.nexthop_index.get(ip))
            .cloned()
    }

    async fn flush_state_writes(&self, prefix: &IpPrefix, writes: StateWrites) {
        if writes.is_empty() {
            return;
        }
        let fields: FieldValues = writes
            .into_iter()
            .map(|(index, nh)| (index.to_string(), nh))
            .collect();
        if let Err(e) = self
            .state
            .set(STATE_FG_ROUTE_TABLE, &prefix.to_string(), fields)
            .await
        {
            warn!(%prefix, error = %e, "failed to persist bucket map");
        }
    }

    fn set_route_sync(
        &mut self,
        prefix: &IpPrefix,
        nhg_key: &NextHopGroupKey,
        writes: &mut StateWrites,
    ) -> Result<switchd_asic::NhGroupOid, TaskError> {
        let name = match self.prefix_index.get(prefix).cloned().or_else(|| {
            nhg_key
                .next_hops()
                .next()
                .and_then(|nh| self.nexthop_index.get(&nh.ip).cloned())
        }) {
            Some(name) => name,
            None => {
                error!(%prefix, "route addition for a non-configured fine-grained entry");
                return Err(TaskError::precondition("fine-grained group config"));
            }
        };

        if let Some(route) = self.routes.get(prefix) {
            if route.nhg_key == *nhg_key {
                return Ok(route.group_id);
            }
        }

        let mut entry = self
            .groups
            .remove(&name)
            .ok_or_else(|| TaskError::precondition("fine-grained group config"))?;
        let existing = self.routes.remove(prefix);

        let result = self.set_route_inner(prefix, nhg_key, &mut entry, existing, writes);

        self.groups.insert(name, entry);
        match result {
            Ok(route) => {
                let group_id = route.group_id;
                self.routes.insert(*prefix, route);
                Ok(group_id)
            }
            Err((restored, e)) => {
                if let Some(route) = restored {
                    self.routes.insert(*prefix, route);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn set_route_inner(
        &mut self,
        prefix: &IpPrefix,
        nhg_key: &NextHopGroupKey,
        entry: &mut FgNhgEntry,
        existing: Option<FgRouteEntry>,
        writes: &mut StateWrites,
    ) -> Result<FgRouteEntry, (Option<FgRouteEntry>, TaskError)> {
        // Bank count before the first create, when ranges are not known yet.
        let bank_count = if entry.bank_ranges.is_empty() {
            entry.bank_count()
        } else {
            entry.bank_ranges.len()
        };
        let mut changes = vec![BankMemberChanges::default(); bank_count];
        let mut nh_oids: HashMap<NextHopKey, NextHopOid> = HashMap::new();
        let mut next_hop_to_add = false;

        {
            let neighbors = self.neighbors.lock().unwrap();
            for nh in nhg_key.next_hops() {
                let Some(member) = entry.next_hops.get(&nh.ip) else {
                    warn!(nh = %nh, group = %entry.name, "next hop not a member, skipping");
                    continue;
                };
                if !neighbors.has_next_hop(nh) {
                    info!(nh = %nh, "next hop not resolved yet");
                    continue;
                }
                if member.link.is_some() && !member.link_up {
                    info!(nh = %nh, link = ?member.link, "tracked link is down");
                    continue;
                }
                if neighbors.is_interface_down(nh) {
                    info!(nh = %nh, "interface is down, skipping");
                    continue;
                }

                let bank = member.bank as usize;
                match &existing {
                    None => {
                        changes[bank].nhs_to_add.push(nh.clone());
                        next_hop_to_add = true;
                    }
                    Some(route) => {
                        if !route.active_nexthops.contains(nh) {
                            changes[bank].nhs_to_add.push(nh.clone());
                        }
                    }
                }
                nh_oids.insert(
                    nh.clone(),
                    neighbors.next_hop_id(nh).unwrap_or(NextHopOid::NULL),
                );
            }
        }

        let mut route = match existing {
            Some(mut route) => {
                for active in route.active_nexthops.clone() {
                    let bank = entry
                        .next_hops
                        .get(&active.ip)
                        .map(|i| i.bank as usize)
                        .unwrap_or(0);
                    if nh_oids.contains_key(&active) {
                        changes[bank].active_nhs.push(active);
                    } else {
                        changes[bank].nhs_to_del.push(active);
                    }
                }
                if let Err(e) = compute_and_set_changes(
                    self.asic.as_ref(),
                    &mut route,
                    entry,
                    &changes,
                    &nh_oids,
                    writes,
                ) {
                    return Err((Some(route), e));
                }
                route
            }
            None => {
                if !next_hop_to_add {
                    info!(%prefix, "no valid next hops to add yet");
                    return Err((None, TaskError::precondition("resolved next hops")));
                }
                let mut route = FgRouteEntry::default();
                if let Err(e) =
                    self.create_fine_grained_group(&mut route, entry, nhg_key)
                {
                    return Err((None, e));
                }
                if changes.len() < entry.bank_ranges.len() {
                    changes.resize(entry.bank_ranges.len(), BankMemberChanges::default());
                }
                let recovery = self.recovery.remove(&prefix.to_string());
                if let Err(e) = set_new_members(
                    self.asic.as_ref(),
                    &mut route,
                    entry,
                    &changes,
                    &nh_oids,
                    recovery.as_deref(),
                    writes,
                ) {
                    if let Err(cleanup) = remove_fine_grained_group(self.asic.as_ref(), &route) {
                        error!(error = %cleanup, "cleanup after member creation failure failed");
                    }
                    return Err((None, e));
                }
                info!(%prefix, nhg = %nhg_key, "created fine-grained route");
                route
            }
        };

        route.nhg_key = nhg_key.clone();

        {
            let mut neighbors = self.neighbors.lock().unwrap();
            for change in &changes {
                for nh in &change.nhs_to_add {
                    neighbors.increase_ref(nh);
                }
                for nh in &change.nhs_to_del {
                    neighbors.decrease_ref(nh);
                }
            }
        }

        Ok(route)
    }

    /// Creates the driver group and learns the real bucket count. On
    /// non-virtual platforms a failed size query unwinds the group.
    fn create_fine_grained_group(
        &self,
        route: &mut FgRouteEntry,
        entry: &mut FgNhgEntry,
        nhg_key: &NextHopGroupKey,
    ) -> Result<(), TaskError> {
        let group_id = self
            .asic
            .create_next_hop_group(NhGroupKind::FineGrainEcmp {
                configured_size: entry.configured_bucket_size,
            })
            .map_err(|e| TaskError::driver("create_next_hop_group", e.to_string()))?;
        route.group_id = group_id;

        if self.asic.platform() == Platform::Virtual {
            entry.real_bucket_size = entry.configured_bucket_size;
        } else {
            match self.asic.real_bucket_size(group_id) {
                Ok(size) => entry.real_bucket_size = size,
                Err(e) => {
                    error!(nhg = %nhg_key, error = %e, "real bucket size query failed");
                    if let Err(cleanup) = self.asic.remove_next_hop_group(group_id) {
                        error!(error = %cleanup, "cleanup after size query failure failed");
                    }
                    return Err(TaskError::driver("real_bucket_size", e.to_string()));
                }
            }
        }

        entry.calculate_bank_ranges();
        info!(
            nhg = %nhg_key,
            size = entry.real_bucket_size,
            "created fine-grained next-hop group"
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Bucket assignment algorithms
// ----------------------------------------------------------------------

fn cleanup_link_map(group: &mut FgNhgEntry, link: &str, ip: &IpAddress) {
    if let Some(ips) = group.links.get_mut(link) {
        ips.retain(|other| other != ip);
        if ips.is_empty() {
            group.links.remove(link);
        }
    }
}

fn route_fields_from_group_key(key: &NextHopGroupKey) -> FieldValues {
    let ips: Vec<String> = key.next_hops().map(|nh| nh.ip.to_string()).collect();
    let aliases: Vec<String> = key.next_hops().map(|nh| nh.alias.clone()).collect();
    vec![
        ("nexthop".to_string(), ips.join(",")),
        ("ifname".to_string(), aliases.join(",")),
    ]
}

fn oid_of(nh_oids: &HashMap<NextHopKey, NextHopOid>, nh: &NextHopKey) -> NextHopOid {
    nh_oids.get(nh).copied().unwrap_or(NextHopOid::NULL)
}

/// One driver write per changed bucket, persisted for warm restart.
fn write_bucket(
    asic: &dyn AsicAdapter,
    members: &[NhGroupMemberOid],
    index: u32,
    nh_oid: NextHopOid,
    nh: &NextHopKey,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    let member = members
        .get(index as usize)
        .copied()
        .ok_or_else(|| TaskError::driver("set_member_next_hop", format!("no member at bucket {index}")))?;
    asic.set_member_next_hop(member, nh_oid)
        .map_err(|e| TaskError::driver("set_member_next_hop", e.to_string()))?;
    writes.push((index, nh.to_string()));
    Ok(())
}

/// Routes each bank's delta to the active or inactive handling path.
fn compute_and_set_changes(
    asic: &dyn AsicAdapter,
    route: &mut FgRouteEntry,
    entry: &FgNhgEntry,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    for bank in 0..changes.len() {
        if changes[bank].is_active() {
            set_active_bank_changes(asic, route, entry, bank, bank, changes, nh_oids, writes)?;
        } else {
            set_inactive_bank_changes(asic, route, entry, bank, changes, nh_oids, writes)?;
        }
    }
    Ok(())
}

/// Rewrites buckets within an active bank so each live member ends with its
/// fair share. Deletions pair with additions first (1-for-1 bucket hand-off),
/// then net deletions spread round-robin onto live members capped at their
/// fair share, and net additions steal buckets one-by-one from the richest
/// rotation, never from a donor holding a single bucket.
///
/// `bank` selects the membership delta; `syncd_bank` the bucket range being
/// rewritten. They differ when an inactive bank borrows a donor's members.
#[allow(clippy::too_many_arguments)]
fn set_active_bank_changes(
    asic: &dyn AsicAdapter,
    route: &mut FgRouteEntry,
    entry: &FgNhgEntry,
    bank: usize,
    syncd_bank: usize,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    let mut change = changes[bank].clone();
    let FgRouteEntry {
        members,
        bank_maps,
        active_nexthops,
        ..
    } = route;
    let bank_map = &mut bank_maps[syncd_bank];

    let mut add_idx = 0;
    let mut del_idx = 0;

    // Paired replacement: the new member takes over the deleted member's
    // buckets wholesale.
    while del_idx < change.nhs_to_del.len() && add_idx < change.nhs_to_add.len() {
        let del_nh = change.nhs_to_del[del_idx].clone();
        let add_nh = change.nhs_to_add[add_idx].clone();
        let buckets = bank_map.get(&del_nh).cloned().unwrap_or_default();
        for &bucket in &buckets {
            write_bucket(asic, members, bucket, oid_of(nh_oids, &add_nh), &add_nh, writes)?;
        }
        bank_map.insert(add_nh.clone(), buckets);
        bank_map.remove(&del_nh);
        change.active_nhs.push(add_nh.clone());
        active_nexthops.remove(&del_nh);
        active_nexthops.insert(add_nh);
        del_idx += 1;
        add_idx += 1;
    }

    // Net deletions: hand the dead member's buckets round-robin to the
    // remaining members, retiring each receiver once it reaches its share.
    if del_idx < change.nhs_to_del.len() {
        let range = entry.bank_ranges[syncd_bank];
        let bank_size = range.size();
        let live = change.active_nhs.len() as u32;
        if live == 0 {
            return Err(TaskError::driver(
                "bucket_redistribute",
                "no live members left in active bank".to_string(),
            ));
        }
        let exp_bucket_size = bank_size / live;
        let mut nhs_with_one_more = bank_size % live;

        while del_idx < change.nhs_to_del.len() {
            let del_nh = change.nhs_to_del[del_idx].clone();
            let buckets = bank_map.get(&del_nh).cloned().unwrap_or_default();
            for (i, &bucket) in buckets.iter().enumerate() {
                if change.active_nhs.is_empty() {
                    return Err(TaskError::driver(
                        "bucket_redistribute",
                        "ran out of receivers before buckets".to_string(),
                    ));
                }
                let pos = i % change.active_nhs.len();
                let receiver = change.active_nhs[pos].clone();
                write_bucket(asic, members, bucket, oid_of(nh_oids, &receiver), &receiver, writes)?;
                let holding = bank_map.entry(receiver.clone()).or_default();
                holding.push(bucket);
                let held = holding.len() as u32;

                // Fair-share cap: a receiver that reached its target stops
                // receiving; one-more slots are consumed as they fill.
                if nhs_with_one_more == 0 {
                    if held == exp_bucket_size {
                        change.active_nhs.remove(pos);
                    } else if held > exp_bucket_size {
                        warn!(nh = %receiver, held, exp_bucket_size, "receiver over fair share");
                    }
                } else if held == exp_bucket_size + 1 {
                    change.active_nhs.remove(pos);
                    nhs_with_one_more -= 1;
                } else if held > exp_bucket_size + 1 {
                    warn!(nh = %receiver, held, exp_bucket_size, "receiver over fair share");
                }
            }
            bank_map.remove(&del_nh);
            active_nexthops.remove(&del_nh);
            del_idx += 1;
        }
    }

    // Net additions: each new member steals buckets from live donors until
    // it reaches its own fair share.
    if add_idx < change.nhs_to_add.len() {
        let range = entry.bank_ranges[syncd_bank];
        let bank_size = range.size();
        let total = change.active_nhs.len() as u32
            + (change.nhs_to_add.len() - add_idx) as u32;
        let exp_bucket_size = bank_size / total;
        let mut nhs_with_one_more = bank_size % total;
        let mut nhs_with_exact = total - nhs_with_one_more;

        while add_idx < change.nhs_to_add.len() {
            let add_nh = change.nhs_to_add[add_idx].clone();
            bank_map.entry(add_nh.clone()).or_default();
            let target = if nhs_with_exact > 0 {
                nhs_with_exact -= 1;
                exp_bucket_size
            } else {
                nhs_with_one_more -= 1;
                exp_bucket_size + 1
            };

            let mut donor_pos = 0usize;
            while bank_map.get(&add_nh).map(Vec::len).unwrap_or(0) < target as usize {
                if change.active_nhs.is_empty() {
                    return Err(TaskError::driver(
                        "bucket_steal",
                        "no donors left for new member".to_string(),
                    ));
                }
                if donor_pos >= change.active_nhs.len() {
                    donor_pos = 0;
                }
                let donor = change.active_nhs[donor_pos].clone();
                let donor_held = bank_map.get(&donor).map(Vec::len).unwrap_or(0);
                if donor_held <= 1 {
                    warn!(nh = %donor, donor_held, "donor too poor to give up a bucket");
                    return Err(TaskError::driver(
                        "bucket_steal",
                        format!("donor {donor} has {donor_held} buckets"),
                    ));
                }

                let bucket = {
                    let donor_buckets = bank_map.get_mut(&donor).expect("donor holds buckets");
                    donor_buckets.pop().expect("donor checked non-empty")
                };
                write_bucket(asic, members, bucket, oid_of(nh_oids, &add_nh), &add_nh, writes)?;
                bank_map.get_mut(&add_nh).expect("created above").push(bucket);

                let donor_left = bank_map.get(&donor).map(Vec::len).unwrap_or(0) as u32;
                if nhs_with_one_more == 0 {
                    if donor_left == exp_bucket_size {
                        change.active_nhs.remove(donor_pos);
                        if donor_pos >= change.active_nhs.len() {
                            donor_pos = 0;
                        }
                    } else {
                        if donor_left < exp_bucket_size {
                            warn!(nh = %donor, donor_left, exp_bucket_size, "donor under fair share");
                        }
                        donor_pos += 1;
                    }
                } else if donor_left == exp_bucket_size + 1 {
                    change.active_nhs.remove(donor_pos);
                    nhs_with_one_more -= 1;
                    if donor_pos >= change.active_nhs.len() {
                        donor_pos = 0;
                    }
                } else {
                    if donor_left < exp_bucket_size {
                        warn!(nh = %donor, donor_left, exp_bucket_size, "donor under fair share");
                    }
                    donor_pos += 1;
                }
            }
            active_nexthops.insert(add_nh);
            add_idx += 1;
        }
    }

    Ok(())
}

/// Fills an inactive bank's whole range from the first bank that has (or is
/// gaining) live members, and records the donor. With no live bank anywhere,
/// buckets are left pointing at their last members; a later membership
/// change recovers them.
#[allow(clippy::too_many_arguments)]
fn set_inactive_bank_to_next_active(
    asic: &dyn AsicAdapter,
    route: &mut FgRouteEntry,
    entry: &FgNhgEntry,
    bank: usize,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    for (donor_bank, donor_changes) in changes.iter().enumerate() {
        if donor_changes.active_nhs.is_empty() && donor_changes.nhs_to_add.is_empty() {
            continue;
        }
        route.bank_maps[bank].clear();
        route
            .inactive_to_active
            .insert(bank as u32, donor_bank as u32);

        let mut donors = donor_changes.active_nhs.clone();
        donors.extend(donor_changes.nhs_to_add.iter().cloned());

        let range = entry.bank_ranges[bank];
        let FgRouteEntry {
            members, bank_maps, ..
        } = route;
        for index in range.start..=range.end {
            let nh = donors[index as usize % donors.len()].clone();
            write_bucket(asic, members, index, oid_of(nh_oids, &nh), &nh, writes)?;
            bank_maps[bank].entry(nh).or_default().push(index);
        }
        return Ok(());
    }

    info!("all banks of fine-grained next hops are down");
    route.bank_maps[bank].clear();
    Ok(())
}

/// Handles banks with no live members: a bank coming back up lays its range
/// down round-robin over the new members; a bank going down hands its range
/// to a donor; a bank staying down follows its donor's membership changes.
#[allow(clippy::too_many_arguments)]
fn set_inactive_bank_changes(
    asic: &dyn AsicAdapter,
    route: &mut FgRouteEntry,
    entry: &FgNhgEntry,
    bank: usize,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    let change = &changes[bank];

    if !change.nhs_to_add.is_empty() {
        // Bank turns active again: reclaim its own range.
        route.bank_maps[bank].clear();
        let range = entry.bank_ranges[bank];
        {
            let FgRouteEntry {
                members,
                bank_maps,
                active_nexthops,
                ..
            } = route;
            for index in range.start..=range.end {
                let nh = change.nhs_to_add[index as usize % change.nhs_to_add.len()].clone();
                write_bucket(asic, members, index, oid_of(nh_oids, &nh), &nh, writes)?;
                bank_maps[bank].entry(nh.clone()).or_default().push(index);
                active_nexthops.insert(nh);
            }
        }
        route.inactive_to_active.insert(bank as u32, bank as u32);
        info!(bank, "bank of fine-grained next hops is up");
    } else if !change.nhs_to_del.is_empty() {
        // Bank just went fully down: reroute its range to a donor.
        set_inactive_bank_to_next_active(asic, route, entry, bank, changes, nh_oids, writes)?;
        for nh in &change.nhs_to_del {
            route.active_nexthops.remove(nh);
        }
        info!(bank, "bank of fine-grained next hops is down");
    } else {
        // Bank stays down: track the donor's own membership changes.
        let donor = route
            .inactive_to_active
            .get(&(bank as u32))
            .copied()
            .unwrap_or(bank as u32) as usize;
        if changes
            .get(donor)
            .map(|c| c.active_nhs.is_empty())
            .unwrap_or(true)
        {
            set_inactive_bank_to_next_active(asic, route, entry, bank, changes, nh_oids, writes)?;
        } else {
            set_active_bank_changes(asic, route, entry, donor, bank, changes, nh_oids, writes)?;
        }
    }
    Ok(())
}

/// Create-path bucket layout: one driver member per index, chosen
/// round-robin per bank — or straight from the persisted map when a warm
/// restart left one.
#[allow(clippy::too_many_arguments)]
fn set_new_members(
    asic: &dyn AsicAdapter,
    route: &mut FgRouteEntry,
    entry: &FgNhgEntry,
    changes: &[BankMemberChanges],
    nh_oids: &HashMap<NextHopKey, NextHopOid>,
    recovery: Option<&[String]>,
    writes: &mut StateWrites,
) -> Result<(), TaskError> {
    for bank in 0..entry.bank_ranges.len() {
        route.inactive_to_active.insert(bank as u32, bank as u32);
        if route.bank_maps.len() <= bank {
            route.bank_maps.push(HashMap::new());
        }

        let mut member_bank = bank;
        if changes[bank].nhs_to_add.is_empty() {
            for (donor, donor_changes) in changes.iter().enumerate() {
                if !donor_changes.nhs_to_add.is_empty() {
                    member_bank = donor;
                    route.inactive_to_active.insert(bank as u32, donor as u32);
                    break;
                }
            }
            info!(bank, "bank of fine-grained next hops is down");
        }
        if changes[member_bank].nhs_to_add.is_empty() {
            info!("found no next hops to add, deferring route");
            return Err(TaskError::precondition("resolved next hops"));
        }

        let range = entry.bank_ranges[bank];
        for index in range.start..=range.end {
            let nh = recovery
                .and_then(|map| map.get(index as usize))
                .filter(|text| !text.is_empty())
                .and_then(|text| text.parse::<NextHopKey>().ok())
                .unwrap_or_else(|| {
                    let adds = &changes[member_bank].nhs_to_add;
                    adds[index as usize % adds.len()].clone()
                });

            // A recovered bucket may belong to another bank's member; that
            // re-establishes the pre-restart fail-over mapping.
            if recovery.is_some() {
                if let Some(info) = entry.next_hops.get(&nh.ip) {
                    if info.bank as usize != bank {
                        route.inactive_to_active.insert(bank as u32, info.bank);
                    }
                }
            }

            let member = asic
                .create_group_member(route.group_id, oid_of(nh_oids, &nh), Some(index), None)
                .map_err(|e| TaskError::driver("create_group_member", e.to_string()))?;
            writes.push((index, nh.to_string()));
            route.bank_maps[bank].entry(nh.clone()).or_default().push(index);
            route.active_nexthops.insert(nh);
            route.members.push(member);
        }
    }
    Ok(())
}

/// Removes every member then the group itself.
fn remove_fine_grained_group(
    asic: &dyn AsicAdapter,
    route: &FgRouteEntry,
) -> Result<(), TaskError> {
    for member in &route.members {
        asic.remove_group_member(*member)
            .map_err(|e| TaskError::driver("remove_group_member", e.to_string()))?;
    }
    if !route.group_id.is_null() {
        asic.remove_next_hop_group(route.group_id)
            .map_err(|e| TaskError::driver("remove_next_hop_group", e.to_string()))?;
    }
    Ok(())
}
