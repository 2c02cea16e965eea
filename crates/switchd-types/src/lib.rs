//! Common value types for the switchd control plane.
//!
//! These types appear in store keys and fields throughout the workspace, so
//! their textual forms are part of the wire contract:
//!
//! - [`IpAddress`] / [`IpPrefix`]: addresses and CIDR prefixes
//! - [`MacAddress`]: 48-bit Ethernet addresses
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`AdminStatus`] / [`OperStatus`]: link state enums (`up`/`down`)

mod ip;
mod link;
mod mac;
mod vlan;

pub use ip::{IpAddress, IpPrefix};
pub use link::{AdminStatus, OperStatus};
pub use mac::MacAddress;
pub use vlan::VlanId;

/// Common error type for textual-form parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("invalid IP address: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid VLAN id {0} (valid range 1-4094)")]
    InvalidVlanId(String),

    #[error("invalid link state: {0}")]
    InvalidLinkState(String),
}
