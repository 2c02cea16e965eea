//! vlanmgrd: VLAN configuration manager.
//!
//! Translates `VLAN` and `VLAN_MEMBER` config rows into kernel bridge state
//! through the link adapter, publishes the applied rows to the app store and
//! readiness to the state store. VLAN member changes wait for the port and
//! the VLAN to be state-ok and retry until they are.

pub mod tables;
mod vlan_mgr;

pub use vlan_mgr::VlanMgr;
