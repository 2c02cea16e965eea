//! Route records into app-store rows, with offload acknowledgement.

use crate::fpm::encode_frame;
use crate::netlink::{
    self, LabelRouteRecord, LocalSidRecord, NetlinkRecord, RouteOp, RouteRecord,
};
use crate::tables::{
    APP_LABEL_ROUTE_TABLE, APP_ROUTE_TABLE, APP_SRV6_MY_SID_TABLE, APP_VNET_ROUTE_TABLE,
    APP_VNET_TUNNEL_TABLE, VNET_PREFIX,
};
use crate::warm::WarmStartHelper;
use std::collections::HashMap;
use std::sync::Arc;
use switchd_orch_common::{FieldValues, Store, StoreError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Tables the warm helper reconciles.
pub const WARM_TABLES: [&str; 3] = [
    APP_ROUTE_TABLE,
    APP_LABEL_ROUTE_TABLE,
    APP_SRV6_MY_SID_TABLE,
];

pub struct RouteSync {
    app: Arc<dyn Store>,
    pub warm: WarmStartHelper,
    /// With suppression on, the offload echo waits for the driver-side
    /// response; off, routes are acknowledged as soon as they are written.
    suppression_enabled: bool,
    /// ifindex -> interface name, learned from link messages or seeded.
    link_names: HashMap<u32, String>,
    /// Raw messages awaiting a response before their echo.
    pending_offload: HashMap<String, Vec<u8>>,
    /// Framed messages to write back to the routing daemon.
    echo_tx: Option<UnboundedSender<Vec<u8>>>,
}

impl RouteSync {
    pub fn new(app: Arc<dyn Store>) -> Self {
        Self {
            app,
            warm: WarmStartHelper::new(),
            suppression_enabled: false,
            link_names: HashMap::new(),
            pending_offload: HashMap::new(),
            echo_tx: None,
        }
    }

    pub fn set_suppression_enabled(&mut self, enabled: bool) {
        self.suppression_enabled = enabled;
        info!(enabled, "route suppression");
    }

    pub fn is_suppression_enabled(&self) -> bool {
        self.suppression_enabled
    }

    /// Wires the channel whose frames go back over the FPM connection.
    pub fn set_echo_sender(&mut self, tx: UnboundedSender<Vec<u8>>) {
        self.echo_tx = Some(tx);
    }

    pub fn register_link(&mut self, ifindex: u32, name: impl Into<String>) {
        self.link_names.insert(ifindex, name.into());
    }

    fn ifname(&self, ifindex: Option<u32>) -> String {
        match ifindex {
            Some(idx) => self
                .link_names
                .get(&idx)
                .cloned()
                .unwrap_or_else(|| format!("if{idx}")),
            None => String::new(),
        }
    }

    /// Decodes and applies one netlink payload from either source.
    /// Malformed messages are logged and dropped.
    pub async fn handle_payload(&mut self, raw: &[u8]) {
        match netlink::decode(raw) {
            Ok(NetlinkRecord::Route(record)) => {
                if let Err(e) = self.handle_route(&record, raw).await {
                    warn!(prefix = %record.prefix, error = %e, "route write failed");
                }
            }
            Ok(NetlinkRecord::LabelRoute(record)) => {
                if let Err(e) = self.handle_label_route(&record).await {
                    warn!(label = record.in_label, error = %e, "label route write failed");
                }
            }
            Ok(NetlinkRecord::LocalSid(record)) => {
                if let Err(e) = self.handle_local_sid(&record).await {
                    warn!(sid = %record.sid, error = %e, "local sid write failed");
                }
            }
            Ok(NetlinkRecord::Other { msg_type }) => {
                debug!(msg_type, "ignoring unhandled message type");
            }
            Err(e) => warn!(error = %e, "dropping undecodable message"),
        }
    }

    async fn handle_route(
        &mut self,
        record: &RouteRecord,
        raw: &[u8],
    ) -> Result<(), StoreError> {
        let first_ifname = self.ifname(record.nexthops.first().and_then(|nh| nh.ifindex));

        // Routes out a Vnet interface land in the vnet tables, keyed
        // `<vnet>:<prefix>`.
        if first_ifname.starts_with(VNET_PREFIX) {
            return self.handle_vnet_route(record, &first_ifname).await;
        }

        let key = record.prefix.to_string();
        match record.op {
            RouteOp::Add => {
                let fields = self.route_fields(record);
                if self.warm.in_progress() {
                    self.warm.buffer(APP_ROUTE_TABLE, &key, Some(fields));
                } else {
                    self.app.set(APP_ROUTE_TABLE, &key, fields).await?;
                }
                self.queue_offload(&key, raw);
            }
            RouteOp::Del => {
                if self.warm.in_progress() {
                    self.warm.buffer(APP_ROUTE_TABLE, &key, None);
                } else {
                    self.app.del(APP_ROUTE_TABLE, &key).await?;
                }
                self.pending_offload.remove(&key);
            }
        }
        Ok(())
    }

    /// Field layout of a ROUTE_TABLE row: comma-joined positional lists.
    fn route_fields(&self, record: &RouteRecord) -> FieldValues {
        let mut nexthops = Vec::new();
        let mut ifnames = Vec::new();
        let mut weights = Vec::new();
        let mut mpls = Vec::new();
        let mut vnis = Vec::new();
        let mut macs = Vec::new();
        let mut segments = Vec::new();
        let mut seg_srcs = Vec::new();

        for nh in &record.nexthops {
            nexthops.push(
                nh.gateway
                    .map(|gw| gw.to_string())
                    .unwrap_or_default(),
            );
            ifnames.push(self.ifname(nh.ifindex));
            weights.push(nh.weight.to_string());
            mpls.push(if nh.labels.is_empty() {
                "na".to_string()
            } else {
                format!(
                    "push+{}",
                    nh.labels
                        .iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join("/")
                )
            });
            if let Some(vni) = nh.vni {
                vnis.push(vni.to_string());
            }
            if let Some(mac) = nh.router_mac {
                macs.push(mac.to_string());
            }
            if let Some(sid) = nh.vpn_sid {
                segments.push(sid.to_string());
            }
            if let Some(src) = nh.seg_src {
                seg_srcs.push(src.to_string());
            }
        }

        let mut fields: FieldValues = vec![
            ("nexthop".to_string(), nexthops.join(",")),
            ("ifname".to_string(), ifnames.join(",")),
        ];
        if record.nexthops.iter().any(|nh| nh.weight > 1) {
            fields.push(("weight".to_string(), weights.join(",")));
        }
        if record.nexthops.iter().any(|nh| !nh.labels.is_empty()) {
            fields.push(("mpls_nh".to_string(), mpls.join(",")));
        }
        if !vnis.is_empty() {
            fields.push(("vni_label".to_string(), vnis.join(",")));
            fields.push(("router_mac".to_string(), macs.join(",")));
        }
        if !segments.is_empty() {
            fields.push(("segment".to_string(), segments.join(",")));
            fields.push(("seg_src".to_string(), seg_srcs.join(",")));
        }
        fields.push(("protocol".to_string(), record.protocol.to_string()));
        fields
    }

    async fn handle_vnet_route(
        &mut self,
        record: &RouteRecord,
        vnet: &str,
    ) -> Result<(), StoreError> {
        let key = format!("{vnet}:{}", record.prefix);
        // Remote routes (a gateway endpoint and a VNI) are tunnel routes;
        // local subnets route out the vnet interface itself.
        let first = record.nexthops.first();
        let tunnel = first
            .map(|nh| nh.gateway.is_some() && nh.vni.is_some())
            .unwrap_or(false);

        match record.op {
            RouteOp::Add => {
                if tunnel {
                    let nh = first.expect("tunnel implies a next hop");
                    let mut fields: FieldValues = vec![(
                        "endpoint".to_string(),
                        nh.gateway.map(|gw| gw.to_string()).unwrap_or_default(),
                    )];
                    if let Some(vni) = nh.vni {
                        fields.push(("vni".to_string(), vni.to_string()));
                    }
                    if let Some(mac) = nh.router_mac {
                        fields.push(("mac_address".to_string(), mac.to_string()));
                    }
                    self.app.set(APP_VNET_TUNNEL_TABLE, &key, fields).await?;
                } else {
                    let fields: FieldValues = vec![
                        ("ifname".to_string(), vnet.to_string()),
                        (
                            "nexthop".to_string(),
                            first
                                .and_then(|nh| nh.gateway)
                                .map(|gw| gw.to_string())
                                .unwrap_or_default(),
                        ),
                    ];
                    self.app.set(APP_VNET_ROUTE_TABLE, &key, fields).await?;
                }
            }
            RouteOp::Del => {
                self.app.del(APP_VNET_TUNNEL_TABLE, &key).await?;
                self.app.del(APP_VNET_ROUTE_TABLE, &key).await?;
            }
        }
        Ok(())
    }

    async fn handle_label_route(&mut self, record: &LabelRouteRecord) -> Result<(), StoreError> {
        let key = record.in_label.to_string();
        match record.op {
            RouteOp::Add => {
                let nh = record.nexthops.first().cloned().unwrap_or_default();
                let fields: FieldValues = vec![
                    (
                        "nexthop".to_string(),
                        nh.gateway.map(|gw| gw.to_string()).unwrap_or_default(),
                    ),
                    ("ifname".to_string(), self.ifname(nh.ifindex)),
                ];
                if self.warm.in_progress() {
                    self.warm.buffer(APP_LABEL_ROUTE_TABLE, &key, Some(fields));
                } else {
                    self.app.set(APP_LABEL_ROUTE_TABLE, &key, fields).await?;
                }
            }
            RouteOp::Del => {
                if self.warm.in_progress() {
                    self.warm.buffer(APP_LABEL_ROUTE_TABLE, &key, None);
                } else {
                    self.app.del(APP_LABEL_ROUTE_TABLE, &key).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_local_sid(&mut self, record: &LocalSidRecord) -> Result<(), StoreError> {
        // Key carries the SID structure so consumers can split locator and
        // function bits: `block:node:func:arg:sid`.
        let key = format!(
            "{}:{}:{}:{}:{}",
            record.block_len, record.node_len, record.func_len, record.arg_len, record.sid
        );
        match record.op {
            RouteOp::Add => {
                let mut fields: FieldValues =
                    vec![("action".to_string(), record.action.as_str().to_string())];
                if let Some(vrf) = &record.vrf {
                    fields.push(("vrf".to_string(), vrf.clone()));
                }
                if let Some(adj) = &record.adj {
                    fields.push(("adj".to_string(), adj.to_string()));
                }
                if self.warm.in_progress() {
                    self.warm.buffer(APP_SRV6_MY_SID_TABLE, &key, Some(fields));
                } else {
                    self.app.set(APP_SRV6_MY_SID_TABLE, &key, fields).await?;
                }
            }
            RouteOp::Del => {
                if self.warm.in_progress() {
                    self.warm.buffer(APP_SRV6_MY_SID_TABLE, &key, None);
                } else {
                    self.app.del(APP_SRV6_MY_SID_TABLE, &key).await?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Offload acknowledgement
    // ------------------------------------------------------------------

    fn queue_offload(&mut self, key: &str, raw: &[u8]) {
        if self.suppression_enabled {
            self.pending_offload.insert(key.to_string(), raw.to_vec());
        } else {
            self.send_offload_echo(raw.to_vec());
        }
    }

    /// The driver-facing side confirmed this route: echo the original
    /// message with the offload flag set.
    pub fn on_route_response(&mut self, key: &str) {
        if let Some(raw) = self.pending_offload.remove(key) {
            self.send_offload_echo(raw);
        }
    }

    fn send_offload_echo(&mut self, mut raw: Vec<u8>) {
        if !netlink::set_offload_flag(&mut raw) {
            return;
        }
        if let Some(tx) = &self.echo_tx {
            let _ = tx.send(encode_frame(&raw));
        }
    }

    /// Warm start: every stored route is already programmed, so the routing
    /// daemon is told each one is offloaded as soon as it reconnects.
    pub async fn mark_routes_offloaded(&mut self) -> Result<usize, StoreError> {
        let keys = self.app.keys(APP_ROUTE_TABLE).await?;
        let mut echoed = 0;
        for key in keys {
            let Ok(prefix) = key.parse() else { continue };
            let Some(fields) = self.app.get(APP_ROUTE_TABLE, &key).await? else {
                continue;
            };
            let record = record_from_fields(prefix, &fields);
            let raw = netlink::encode_route(&record);
            self.send_offload_echo(raw);
            echoed += 1;
        }
        info!(echoed, "marked restored routes offloaded");
        Ok(echoed)
    }

    /// Ends warm-restart buffering by applying the replay delta.
    pub async fn finish_warm_restart(&mut self) -> Result<(), StoreError> {
        if self.warm.in_progress() {
            self.warm.reconcile(self.app.as_ref()).await?;
        }
        Ok(())
    }
}

/// Rebuilds a minimal route record from stored fields, for the restored
/// offload echo.
fn record_from_fields(
    prefix: switchd_types::IpPrefix,
    fields: &FieldValues,
) -> RouteRecord {
    let field = |name: &str| {
        fields
            .iter()
            .find(|(f, _)| f == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    };
    let nexthops = field("nexthop")
        .split(',')
        .filter(|gw| !gw.is_empty())
        .map(|gw| netlink::RouteNextHop {
            gateway: gw.parse().ok(),
            weight: 1,
            ..netlink::RouteNextHop::default()
        })
        .collect::<Vec<_>>();
    RouteRecord {
        op: RouteOp::Add,
        prefix,
        protocol: field("protocol").parse().unwrap_or(0),
        offloaded: true,
        nexthops: if nexthops.is_empty() {
            vec![netlink::RouteNextHop::default()]
        } else {
            nexthops
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::{encode_local_sid, encode_route, LocalSidAction, RouteNextHop};
    use pretty_assertions::assert_eq;
    use switchd_orch_common::MemStore;
    use tokio::sync::mpsc;

    fn sync_with(store: &MemStore) -> RouteSync {
        let mut sync = RouteSync::new(Arc::new(store.clone()));
        sync.register_link(1, "Ethernet0");
        sync.register_link(2, "Ethernet4");
        sync.register_link(9, "Vnet-red");
        sync
    }

    fn route(prefix: &str, nexthops: Vec<RouteNextHop>) -> RouteRecord {
        RouteRecord {
            op: RouteOp::Add,
            prefix: prefix.parse().unwrap(),
            protocol: 186,
            offloaded: false,
            nexthops,
        }
    }

    #[tokio::test]
    async fn ecmp_route_written_with_positional_fields() {
        let store = MemStore::new();
        let mut sync = sync_with(&store);

        let record = route(
            "10.1.0.0/24",
            vec![
                RouteNextHop {
                    gateway: Some("10.0.0.1".parse().unwrap()),
                    ifindex: Some(1),
                    weight: 3,
                    ..RouteNextHop::default()
                },
                RouteNextHop {
                    gateway: Some("10.0.0.2".parse().unwrap()),
                    ifindex: Some(2),
                    weight: 1,
                    labels: vec![10100],
                    ..RouteNextHop::default()
                },
            ],
        );
        let raw = encode_route(&record);
        sync.handle_payload(&raw).await;

        assert_eq!(
            store.field(APP_ROUTE_TABLE, "10.1.0.0/24", "nexthop"),
            Some("10.0.0.1,10.0.0.2".to_string())
        );
        assert_eq!(
            store.field(APP_ROUTE_TABLE, "10.1.0.0/24", "ifname"),
            Some("Ethernet0,Ethernet4".to_string())
        );
        assert_eq!(
            store.field(APP_ROUTE_TABLE, "10.1.0.0/24", "weight"),
            Some("3,1".to_string())
        );
        assert_eq!(
            store.field(APP_ROUTE_TABLE, "10.1.0.0/24", "mpls_nh"),
            Some("na,push+10100".to_string())
        );
    }

    #[tokio::test]
    async fn route_delete_removes_row() {
        let store = MemStore::new();
        let mut sync = sync_with(&store);
        let mut record = route("10.1.0.0/24", vec![RouteNextHop::gateway("10.0.0.1")]);
        sync.handle_payload(&encode_route(&record)).await;
        assert!(store.contains(APP_ROUTE_TABLE, "10.1.0.0/24"));

        record.op = RouteOp::Del;
        sync.handle_payload(&encode_route(&record)).await;
        assert!(!store.contains(APP_ROUTE_TABLE, "10.1.0.0/24"));
    }

    #[tokio::test]
    async fn local_sid_row_uses_structured_key() {
        let store = MemStore::new();
        let mut sync = sync_with(&store);
        let record = LocalSidRecord {
            op: RouteOp::Add,
            sid: "fc00:0:1:1::".parse().unwrap(),
            block_len: 32,
            node_len: 16,
            func_len: 16,
            arg_len: 0,
            action: LocalSidAction::End,
            vrf: None,
            adj: None,
        };
        sync.handle_payload(&encode_local_sid(&record)).await;
        assert_eq!(
            store.field(APP_SRV6_MY_SID_TABLE, "32:16:16:0:fc00:0:1:1::", "action"),
            Some("end".to_string())
        );

        let del = LocalSidRecord {
            op: RouteOp::Del,
            ..record
        };
        sync.handle_payload(&encode_local_sid(&del)).await;
        assert!(!store.contains(APP_SRV6_MY_SID_TABLE, "32:16:16:0:fc00:0:1:1::"));
    }

    #[tokio::test]
    async fn vnet_tunnel_routes_split_from_plain() {
        let store = MemStore::new();
        let mut sync = sync_with(&store);
        let record = route(
            "10.9.0.0/24",
            vec![RouteNextHop {
                gateway: Some("192.0.2.7".parse().unwrap()),
                ifindex: Some(9),
                weight: 1,
                vni: Some(7000),
                router_mac: Some("52:54:00:00:aa:01".parse().unwrap()),
                ..RouteNextHop::default()
            }],
        );
        sync.handle_payload(&encode_route(&record)).await;
        assert_eq!(
            store.field(APP_VNET_TUNNEL_TABLE, "Vnet-red:10.9.0.0/24", "endpoint"),
            Some("192.0.2.7".to_string())
        );
        assert!(!store.contains(APP_ROUTE_TABLE, "10.9.0.0/24"));
    }

    /// Without suppression the echo fires on write; with suppression it
    /// waits for the driver-side response.
    #[tokio::test]
    async fn offload_echo_paths() {
        let store = MemStore::new();
        let mut sync = sync_with(&store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        sync.set_echo_sender(tx);

        let record = route("10.1.0.0/24", vec![RouteNextHop::gateway("10.0.0.1")]);
        sync.handle_payload(&encode_route(&record)).await;
        let frame = rx.try_recv().expect("immediate echo");
        // The echoed payload has the offload flag set.
        match netlink::decode(&frame[crate::fpm::FPM_HEADER_LEN..]).unwrap() {
            NetlinkRecord::Route(r) => assert!(r.offloaded),
            other => panic!("unexpected: {other:?}"),
        }

        sync.set_suppression_enabled(true);
        let record2 = route("10.2.0.0/24", vec![RouteNextHop::gateway("10.0.0.1")]);
        sync.handle_payload(&encode_route(&record2)).await;
        assert!(rx.try_recv().is_err(), "echo must wait for the response");

        sync.on_route_response("10.2.0.0/24");
        let frame = rx.try_recv().expect("echo after response");
        match netlink::decode(&frame[crate::fpm::FPM_HEADER_LEN..]).unwrap() {
            NetlinkRecord::Route(r) => {
                assert!(r.offloaded);
                assert_eq!(r.prefix.to_string(), "10.2.0.0/24");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn warm_restart_buffers_then_reconciles() {
        let store = MemStore::new();
        store
            .set(
                APP_ROUTE_TABLE,
                "10.0.0.0/24",
                vec![("nexthop".to_string(), "10.0.0.1".to_string())],
            )
            .await
            .unwrap();

        let mut sync = sync_with(&store);
        sync.warm.load(&store, &WARM_TABLES).await.unwrap();

        // Replayed write is buffered, not applied.
        let record = route(
            "10.5.0.0/24",
            vec![RouteNextHop {
                gateway: Some("10.0.0.5".parse().unwrap()),
                ifindex: Some(1),
                weight: 1,
                ..RouteNextHop::default()
            }],
        );
        sync.handle_payload(&encode_route(&record)).await;
        assert!(!store.contains(APP_ROUTE_TABLE, "10.5.0.0/24"));

        sync.finish_warm_restart().await.unwrap();
        assert!(store.contains(APP_ROUTE_TABLE, "10.5.0.0/24"));
        // The restored route never replayed: stale, removed.
        assert!(!store.contains(APP_ROUTE_TABLE, "10.0.0.0/24"));
    }

    #[tokio::test]
    async fn restored_routes_are_echoed_offloaded() {
        let store = MemStore::new();
        store
            .set(
                APP_ROUTE_TABLE,
                "10.0.0.0/24",
                vec![
                    ("nexthop".to_string(), "10.0.0.1".to_string()),
                    ("ifname".to_string(), "Ethernet0".to_string()),
                ],
            )
            .await
            .unwrap();

        let mut sync = sync_with(&store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        sync.set_echo_sender(tx);

        let echoed = sync.mark_routes_offloaded().await.unwrap();
        assert_eq!(echoed, 1);
        let frame = rx.try_recv().unwrap();
        match netlink::decode(&frame[crate::fpm::FPM_HEADER_LEN..]).unwrap() {
            NetlinkRecord::Route(r) => {
                assert!(r.offloaded);
                assert_eq!(r.prefix.to_string(), "10.0.0.0/24");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
