//! Tables and channels owned or watched by vlanmgrd.

pub const CFG_VLAN_TABLE: &str = "VLAN";
pub const CFG_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER";

pub const APP_VLAN_TABLE: &str = "VLAN_TABLE";
pub const APP_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";

pub const STATE_VLAN_TABLE: &str = "VLAN_TABLE";
pub const STATE_VLAN_MEMBER_TABLE: &str = "VLAN_MEMBER_TABLE";
pub const STATE_PORT_TABLE: &str = "PORT_TABLE";
pub const STATE_LAG_TABLE: &str = "LAG_TABLE";

/// Driver-adapter notifications of VLAN admin-state transitions.
pub const CHANNEL_VLANSTATE: &str = "VLANSTATE";

pub const VLANMGRD_DAEMON: &str = "vlanmgrd";

pub const LAG_PREFIX: &str = "PortChannel";

/// Field names of the VLAN tables.
pub mod fields {
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const MTU: &str = "mtu";
    pub const MAC: &str = "mac";
    pub const MEMBERS: &str = "members@";
    pub const TAGGING_MODE: &str = "tagging_mode";
    pub const STATE: &str = "state";
    pub const STATE_OK: &str = "ok";
}
