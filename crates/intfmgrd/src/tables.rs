//! Tables owned or watched by intfmgrd.

pub const CFG_INTF_TABLE: &str = "INTERFACE";
pub const CFG_VLAN_INTF_TABLE: &str = "VLAN_INTERFACE";

pub const APP_INTF_TABLE: &str = "INTF_TABLE";

pub const STATE_PORT_TABLE: &str = "PORT_TABLE";
pub const STATE_LAG_TABLE: &str = "LAG_TABLE";
pub const STATE_VLAN_TABLE: &str = "VLAN_TABLE";
pub const STATE_VRF_TABLE: &str = "VRF_TABLE";

pub const INTFMGRD_DAEMON: &str = "intfmgrd";

pub const VLAN_PREFIX: &str = "Vlan";
pub const LAG_PREFIX: &str = "PortChannel";
pub const VNET_PREFIX: &str = "Vnet";
pub const VRF_PREFIX: &str = "Vrf";
