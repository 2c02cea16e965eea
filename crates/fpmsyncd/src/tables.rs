//! App-store tables and channels written by fpmsyncd.

pub const APP_ROUTE_TABLE: &str = "ROUTE_TABLE";
pub const APP_LABEL_ROUTE_TABLE: &str = "LABEL_ROUTE_TABLE";
pub const APP_VNET_ROUTE_TABLE: &str = "VNET_ROUTE_TABLE";
pub const APP_VNET_TUNNEL_TABLE: &str = "VNET_TUNNEL_TABLE";
pub const APP_SRV6_MY_SID_TABLE: &str = "SRV6_MY_SID_TABLE";

/// Responses from the driver-facing side for programmed routes; triggers
/// the offload echo.
pub const CHANNEL_ROUTE_RESPONSE: &str = "ROUTE_RESPONSE_CHANNEL";

pub const FPMSYNCD_DAEMON: &str = "fpmsyncd";

/// Interfaces with this prefix steer routes into the VNET tables.
pub const VNET_PREFIX: &str = "Vnet";
