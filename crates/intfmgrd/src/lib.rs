//! intfmgrd: interface and IP-binding manager.
//!
//! Applies `INTERFACE` and `VLAN_INTERFACE` config rows: VRF bindings via
//! `ip link set master`, address bindings via `ip address add/del`. Both
//! wait until the interface (and the VRF, when named) is state-ok.

pub mod tables;
mod intf_mgr;

pub use intf_mgr::IntfMgr;
