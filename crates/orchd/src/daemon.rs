//! Daemon wiring: the directory, table dispatch, and the event loop.
//!
//! All cross-orchestrator state lives in one [`Directory`] built at startup
//! and injected into constructors; there is no module-level mutable state.
//! The loop is single-threaded and cooperative: one wake at a time, each
//! handler runs to completion, pending work is re-driven after every wake.

use crate::fgnhg::{FgNhgOrch, SyncedRouteView};
use crate::neighbor::NeighborTable;
use crate::nexthop::{group_key_from_fields, NextHopKey};
use crate::nhg::NhgOrch;
use crate::tables::{
    APP_NEIGH_TABLE, APP_NEXTHOP_GROUP_TABLE, APP_PORT_TABLE, APP_ROUTE_TABLE,
    CFG_FG_NHG_MEMBER_TABLE, CFG_FG_NHG_PREFIX_TABLE, CFG_FG_NHG_TABLE, CHANNEL_ROUTE_RESPONSE,
    ORCHD_DAEMON,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchd_asic::AsicAdapter;
use switchd_orch_common::{
    ApplyOutcome, Engine, ErrorDb, EventChannel, Executor, KeyOpFieldsValues, Notification,
    NeighborUpdate, PortOperUpdate, Scheduler, Store, StoreError, Stores, WakeEvent,
    WarmRestartCoordinator, CHANNEL_ERROR_NOTIFICATIONS, CHANNEL_FLUSH_ERROR_DB,
};
use switchd_types::{IpAddress, IpPrefix, OperStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Process-wide shared state, injected into every orchestrator.
pub struct Directory {
    pub stores: Stores,
    pub asic: Arc<dyn AsicAdapter>,
    pub neighbors: Arc<Mutex<NeighborTable>>,
    pub routes_view: SyncedRouteView,
    pub port_events: EventChannel<PortOperUpdate>,
    pub neighbor_events: EventChannel<NeighborUpdate>,
}

impl Directory {
    pub fn new(stores: Stores, asic: Arc<dyn AsicAdapter>) -> Self {
        Self {
            stores,
            asic,
            neighbors: Arc::new(Mutex::new(NeighborTable::new())),
            routes_view: Arc::new(Mutex::new(HashMap::new())),
            port_events: EventChannel::default(),
            neighbor_events: EventChannel::default(),
        }
    }
}

/// Tables whose keys this daemon replays on a warm restart.
const REPLAY_TABLES: [&str; 5] = [
    CFG_FG_NHG_TABLE,
    CFG_FG_NHG_PREFIX_TABLE,
    CFG_FG_NHG_MEMBER_TABLE,
    APP_NEXTHOP_GROUP_TABLE,
    APP_ROUTE_TABLE,
];

pub struct OrchDaemon {
    stores: Stores,
    scheduler: Scheduler,
    fgnhg: FgNhgOrch,
    nhg: NhgOrch,
    neighbors: Arc<Mutex<NeighborTable>>,
    routes_view: SyncedRouteView,
    port_events: EventChannel<PortOperUpdate>,
    neighbor_events: EventChannel<NeighborUpdate>,
    errordb: ErrorDb,
    warm: WarmRestartCoordinator,
    /// Daemon-level pending work for route/neigh/port tables.
    engine: Engine,
    /// Prefix -> group index, for reference counting group-backed routes.
    route_group_refs: HashMap<IpPrefix, String>,
}

impl OrchDaemon {
    pub async fn new(
        directory: Directory,
        warm_start: bool,
        cancel: CancellationToken,
    ) -> Result<Self, StoreError> {
        let Directory {
            stores,
            asic,
            neighbors,
            routes_view,
            port_events,
            neighbor_events,
        } = directory;

        let fgnhg = FgNhgOrch::new(
            stores.app.clone(),
            stores.state.clone(),
            asic.clone(),
            neighbors.clone(),
            routes_view.clone(),
        );
        let nhg = NhgOrch::new(stores.state.as_ref(), asic.clone(), neighbors.clone()).await;

        let mut scheduler = Scheduler::new(cancel);
        for table in [
            CFG_FG_NHG_TABLE,
            CFG_FG_NHG_PREFIX_TABLE,
            CFG_FG_NHG_MEMBER_TABLE,
        ] {
            scheduler.register(Executor::Table(stores.cfg.subscribe(table).await?));
        }
        for table in [
            APP_NEXTHOP_GROUP_TABLE,
            APP_ROUTE_TABLE,
            APP_NEIGH_TABLE,
            APP_PORT_TABLE,
        ] {
            scheduler.register(Executor::Table(stores.app.subscribe(table).await?));
        }
        scheduler.register(Executor::Notification(
            stores.app.consume_notifications(CHANNEL_ERROR_NOTIFICATIONS).await?,
        ));
        scheduler.register(Executor::Notification(
            stores.app.consume_notifications(CHANNEL_FLUSH_ERROR_DB).await?,
        ));
        scheduler.register_timer("heartbeat", std::time::Duration::from_secs(1));

        let mut engine = Engine::new();
        engine.register_table(APP_ROUTE_TABLE);
        engine.register_table(APP_NEIGH_TABLE);
        engine.register_table(APP_PORT_TABLE);

        let warm = if warm_start {
            WarmRestartCoordinator::new(ORCHD_DAEMON)
        } else {
            WarmRestartCoordinator::disabled(ORCHD_DAEMON)
        };

        Ok(Self {
            stores,
            scheduler,
            fgnhg,
            nhg,
            neighbors,
            routes_view,
            port_events,
            neighbor_events,
            errordb: ErrorDb::new([APP_ROUTE_TABLE, APP_NEIGH_TABLE]),
            warm,
            engine,
            route_group_refs: HashMap::new(),
        })
    }

    /// Startup: recover warm-restart state and seed pending work from the
    /// current table contents.
    pub async fn init(&mut self) -> Result<(), StoreError> {
        if self.warm.is_enabled() {
            self.fgnhg.bake().await?;
            self.warm.begin(self.stores.state.as_ref()).await?;
            for table in &REPLAY_TABLES {
                let source: &dyn Store = if table.starts_with("FG_NHG") {
                    self.stores.cfg.as_ref()
                } else {
                    self.stores.app.as_ref()
                };
                self.warm.snapshot_table(source, table).await?;
            }
            self.warm.mark_restored(self.stores.state.as_ref()).await?;
        }
        for (namespace, tables) in [
            (
                self.stores.cfg.clone(),
                vec![CFG_FG_NHG_TABLE, CFG_FG_NHG_PREFIX_TABLE, CFG_FG_NHG_MEMBER_TABLE],
            ),
            (
                self.stores.app.clone(),
                vec![APP_NEXTHOP_GROUP_TABLE, APP_PORT_TABLE, APP_NEIGH_TABLE, APP_ROUTE_TABLE],
            ),
        ] {
            for table in tables {
                for key in namespace.keys(table).await? {
                    if let Some(fields) = namespace.get(table, &key).await? {
                        self.dispatch_entry(table, KeyOpFieldsValues::set(key, fields));
                    }
                }
            }
        }
        self.drive().await;
        Ok(())
    }

    /// The cooperative loop: one wake at a time until shutdown.
    pub async fn run(&mut self) {
        info!("orchd event loop started");
        while let Some(wake) = self.scheduler.next().await {
            match wake {
                WakeEvent::Table { table, entry } => self.dispatch_entry(&table, entry),
                WakeEvent::Notification { channel, note } => {
                    self.handle_notification(&channel, note).await
                }
                WakeEvent::Timer { .. } => {}
            }
            self.drive().await;
        }
        self.scheduler.close();
        info!("orchd event loop stopped");
    }

    fn dispatch_entry(&mut self, table: &str, entry: KeyOpFieldsValues) {
        match table {
            CFG_FG_NHG_TABLE | CFG_FG_NHG_PREFIX_TABLE | CFG_FG_NHG_MEMBER_TABLE => {
                self.fgnhg.engine_mut().enqueue(table, [entry]);
            }
            APP_NEXTHOP_GROUP_TABLE => {
                self.nhg.engine_mut().enqueue(table, [entry]);
            }
            APP_ROUTE_TABLE | APP_NEIGH_TABLE | APP_PORT_TABLE => {
                self.engine.enqueue(table, [entry]);
            }
            other => warn!(table = other, "entry for unhandled table"),
        }
    }

    /// Re-drives every engine until nothing more retires. A retired entry
    /// can satisfy another entry's precondition (a group arriving before
    /// its neighbors, a route before its group), so one pass is not enough.
    async fn drive(&mut self) {
        loop {
            let mut retired = 0;

            for (table, key) in self.fgnhg.drain().await {
                self.warm.note_applied(&table, &key);
                retired += 1;
            }
            for key in self.nhg.drain().await {
                self.warm.note_applied(APP_NEXTHOP_GROUP_TABLE, &key);
                retired += 1;
            }

            for table in [APP_NEIGH_TABLE, APP_PORT_TABLE, APP_ROUTE_TABLE] {
                let batch = self.engine.take_pending(table);
                for entry in batch {
                    let outcome = match table {
                        APP_ROUTE_TABLE => self.apply_route(&entry).await,
                        APP_NEIGH_TABLE => self.apply_neighbor(&entry).await,
                        _ => self.apply_port(&entry).await,
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

    async fn apply_route(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let prefix: IpPrefix = match entry.key.parse() {
            Ok(p) => p,
            Err(_) => {
                warn!(key = %entry.key, "malformed route key");
                return ApplyOutcome::Error;
            }
        };

        if entry.op.is_set() {
            // Routes either name a standalone group or carry their own
            // next-hop list.
            if let Some(index) = entry.field("nexthop_group") {
                if !self.nhg.has_group(index) {
                    return ApplyOutcome::Retry;
                }
                let index = index.to_string();
                if let Some(previous) = self.route_group_refs.insert(prefix, index.clone()) {
                    if previous != index {
                        self.nhg.decrement_ref(&previous);
                        self.nhg.increment_ref(&index);
                    }
                } else {
                    self.nhg.increment_ref(&index);
                }
                if let Err(e) = self
                    .stores
                    .app
                    .notify(CHANNEL_ROUTE_RESPONSE, "SET", &entry.key, vec![])
                    .await
                {
                    warn!(%prefix, error = %e, "route response notify failed");
                }
                return ApplyOutcome::Done;
            }

            let nhg_key = match group_key_from_fields(
                entry.field_or("nexthop", ""),
                entry.field_or("ifname", ""),
                entry.field_or("weight", ""),
                entry.field_or("mpls_nh", ""),
            ) {
                Ok(key) => key,
                Err(e) => {
                    warn!(%prefix, error = %e, "malformed route next hops");
                    return ApplyOutcome::Error;
                }
            };

            let outcome = if self.fgnhg.is_route_fine_grained(&prefix, &nhg_key) {
                match self.fgnhg.set_route(prefix, nhg_key).await {
                    Ok(_) => ApplyOutcome::Done,
                    Err(e) => e.outcome(),
                }
            } else {
                self.routes_view.lock().unwrap().insert(prefix, nhg_key);
                ApplyOutcome::Done
            };
            if outcome.is_done() {
                // Tell the route-sync side the route is programmed so it can
                // acknowledge offload to the routing daemon.
                if let Err(e) = self
                    .stores
                    .app
                    .notify(CHANNEL_ROUTE_RESPONSE, "SET", &entry.key, vec![])
                    .await
                {
                    warn!(%prefix, error = %e, "route response notify failed");
                }
            }
            outcome
        } else {
            if let Some(index) = self.route_group_refs.remove(&prefix) {
                self.nhg.decrement_ref(&index);
            }
            if self.fgnhg.has_route(&prefix) {
                if let Err(e) = self.fgnhg.remove_route(prefix).await {
                    return e.outcome();
                }
            }
            self.routes_view.lock().unwrap().remove(&prefix);
            ApplyOutcome::Done
        }
    }

    async fn apply_neighbor(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        // App neighbor keys are `alias:ip`; the ip may itself contain ':'.
        let Some((alias, ip_text)) = entry.key.split_once(':') else {
            warn!(key = %entry.key, "malformed neighbor key");
            return ApplyOutcome::Error;
        };
        let ip: IpAddress = match ip_text.parse() {
            Ok(ip) => ip,
            Err(_) => {
                warn!(key = %entry.key, "malformed neighbor ip");
                return ApplyOutcome::Error;
            }
        };
        let nh = NextHopKey::new(ip, alias);

        if entry.op.is_set() {
            self.neighbors.lock().unwrap().resolve_new(nh.clone());
            self.neighbor_events.publish(NeighborUpdate {
                ip,
                alias: alias.to_string(),
                resolved: true,
            });
            if let Err(e) = self.fgnhg.valid_next_hop(&nh).await {
                warn!(nh = %nh, error = %e, "fine-grained validation failed");
                return ApplyOutcome::Retry;
            }
            if let Err(e) = self.nhg.validate_next_hop(&nh) {
                warn!(nh = %nh, error = %e, "group validation failed");
                return ApplyOutcome::Retry;
            }
            ApplyOutcome::Done
        } else {
            if let Err(e) = self.fgnhg.invalid_next_hop(&nh).await {
                warn!(nh = %nh, error = %e, "fine-grained invalidation failed");
                return ApplyOutcome::Retry;
            }
            if let Err(e) = self.nhg.invalidate_next_hop(&nh) {
                warn!(nh = %nh, error = %e, "group invalidation failed");
                return ApplyOutcome::Retry;
            }
            self.neighbors.lock().unwrap().unresolve(&nh);
            self.neighbor_events.publish(NeighborUpdate {
                ip,
                alias: alias.to_string(),
                resolved: false,
            });
            ApplyOutcome::Done
        }
    }

    async fn apply_port(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let Some(status) = entry.field("oper_status") else {
            return ApplyOutcome::Done;
        };
        let oper: OperStatus = match status.parse() {
            Ok(s) => s,
            Err(_) => {
                warn!(port = %entry.key, status, "unknown oper status");
                return ApplyOutcome::Error;
            }
        };
        let alias = entry.key.clone();
        self.neighbors
            .lock()
            .unwrap()
            .set_interface_down(&alias, !oper.is_up());
        self.port_events.publish(PortOperUpdate {
            alias: alias.clone(),
            status: oper,
        });
        self.fgnhg.handle_port_oper(&alias, oper.is_up()).await;
        ApplyOutcome::Done
    }

    async fn handle_notification(&mut self, channel: &str, note: Notification) {
        match channel {
            CHANNEL_FLUSH_ERROR_DB => {
                if let Err(e) = self.errordb.flush(self.stores.app.as_ref()).await {
                    warn!(error = %e, "error-db flush failed");
                }
            }
            CHANNEL_ERROR_NOTIFICATIONS => {
                if note.op != "saiapi_status" {
                    return;
                }
                // Payload: {"table": .., "key": .., "operation": .., "rc": ..}
                let parsed: Result<serde_json::Value, _> = serde_json::from_str(&note.data);
                let Ok(payload) = parsed else {
                    warn!(data = %note.data, "undecodable error notification");
                    return;
                };
                let table = payload["table"].as_str().unwrap_or_default().to_string();
                let key = payload["key"].as_str().unwrap_or_default().to_string();
                let operation = payload["operation"].as_str().unwrap_or("set").to_string();
                let rc = payload["rc"].as_i64().unwrap_or(-1) as i32;
                if let Err(e) = self
                    .errordb
                    .record_failure(self.stores.app.as_ref(), &table, &key, &operation, rc)
                    .await
                {
                    warn!(error = %e, "error-db record failed");
                }
            }
            other => warn!(channel = other, "notification on unhandled channel"),
        }
    }
}
