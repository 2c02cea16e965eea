//! Shared infrastructure for the configuration manager daemons.
//!
//! The managers translate config-store intent into kernel networking state
//! and app-store rows. Everything they have in common lives here:
//!
//! - [`shell`]: quoted command execution for the platforms that still shell
//!   out to `ip`/`bridge`/`teamd`.
//! - [`LinkCtl`]: the kernel-link adapter. Managers call explicit methods
//!   (`set_link_mtu`, `add_bridge_vlan`, ...) and never build command
//!   strings; [`ShellLinkCtl`] is the shelling implementation and
//!   [`RecordingLinkCtl`] the test double.
//! - [`CfgMgr`]: the daemon-facing trait (owned tables, warm-restart hooks).

mod error;
mod linkctl;
mod manager;
pub mod shell;

pub use error::{CfgMgrError, CfgMgrResult};
pub use linkctl::{AddressFamily, LinkCtl, LinkCtlCall, RecordingLinkCtl, ShellLinkCtl, TaggingMode};
pub use manager::{CfgMgr, DEFAULT_ADMIN_STATUS, DEFAULT_MTU};
