//! Table and channel names consumed or written by orchd.

/// CFG: fine-grained group definitions.
pub const CFG_FG_NHG_TABLE: &str = "FG_NHG";

/// CFG: prefixes bound to a fine-grained group (route-based match mode).
pub const CFG_FG_NHG_PREFIX_TABLE: &str = "FG_NHG_PREFIX";

/// CFG: member next hops of a fine-grained group.
pub const CFG_FG_NHG_MEMBER_TABLE: &str = "FG_NHG_MEMBER";

/// APP: routes produced by the route-sync daemon.
pub const APP_ROUTE_TABLE: &str = "ROUTE_TABLE";

/// APP: standalone next-hop groups referenced by routes.
pub const APP_NEXTHOP_GROUP_TABLE: &str = "NEXTHOP_GROUP_TABLE";

/// APP: resolved neighbors.
pub const APP_NEIGH_TABLE: &str = "NEIGH_TABLE";

/// APP: port oper status mirror, source of link up/down transitions.
pub const APP_PORT_TABLE: &str = "PORT_TABLE";

/// STATE: per-prefix bucket-to-next-hop rows for warm restart.
pub const STATE_FG_ROUTE_TABLE: &str = "FG_ROUTE_TABLE";

/// STATE: driver capability rows.
pub const STATE_SWITCH_CAPABILITY_TABLE: &str = "SWITCH_CAPABILITY";

/// Programmed-route confirmations consumed by the route-sync daemon for its
/// offload acknowledgement.
pub const CHANNEL_ROUTE_RESPONSE: &str = "ROUTE_RESPONSE_CHANNEL";

/// Name of the orchestration daemon, as published to the warm-restart table.
pub const ORCHD_DAEMON: &str = "orchd";
