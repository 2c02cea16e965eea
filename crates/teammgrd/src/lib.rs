//! teammgrd: link aggregation manager.
//!
//! Runs one teamd instance per configured port channel, enslaves members
//! once their ports are ready, and keeps MTU inheritance straight: members
//! run at the LAG's MTU while enslaved and return to their port-config MTU
//! when released.

pub mod tables;
mod team_ctl;
mod team_mgr;

pub use team_ctl::{RecordingTeamCtl, ShellTeamCtl, TeamCtl, TeamCtlCall};
pub use team_mgr::TeamMgr;
