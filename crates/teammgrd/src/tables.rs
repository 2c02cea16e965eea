//! Tables owned or watched by teammgrd.

pub const CFG_LAG_TABLE: &str = "PORTCHANNEL";
pub const CFG_LAG_MEMBER_TABLE: &str = "PORTCHANNEL_MEMBER";
pub const CFG_PORT_TABLE: &str = "PORT";

pub const APP_LAG_TABLE: &str = "LAG_TABLE";
pub const APP_LAG_MEMBER_TABLE: &str = "LAG_MEMBER_TABLE";
pub const APP_PORT_TABLE: &str = "PORT_TABLE";

pub const STATE_PORT_TABLE: &str = "PORT_TABLE";
pub const STATE_LAG_TABLE: &str = "LAG_TABLE";

pub const TEAMMGRD_DAEMON: &str = "teammgrd";

/// Field names used across the LAG tables.
pub mod fields {
    pub const ADMIN_STATUS: &str = "admin_status";
    pub const MTU: &str = "mtu";
    pub const MIN_LINKS: &str = "min_links";
    pub const FALLBACK: &str = "fallback";
    pub const LAG: &str = "lag";
    pub const STATUS: &str = "status";
    pub const STATE: &str = "state";
    pub const STATE_OK: &str = "ok";
}

pub const DEFAULT_ADMIN_STATUS: &str = "up";
pub const DEFAULT_MTU: &str = "9100";
