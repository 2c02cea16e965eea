//! IP address and prefix types.
//!
//! Thin wrappers over the std address types. The wrappers exist so the rest
//! of the workspace gets a single parse-error type and a guaranteed textual
//! form, and so prefixes are always stored with their host bits cleared.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// An IPv4 or IPv6 address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IpAddress(IpAddr);

impl IpAddress {
    /// The IPv4 unspecified address (0.0.0.0).
    pub const UNSPECIFIED_V4: IpAddress = IpAddress(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    /// The IPv6 unspecified address (::).
    pub const UNSPECIFIED_V6: IpAddress = IpAddress(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

    pub const fn new(addr: IpAddr) -> Self {
        IpAddress(addr)
    }

    pub const fn inner(&self) -> IpAddr {
        self.0
    }

    pub const fn is_ipv4(&self) -> bool {
        matches!(self.0, IpAddr::V4(_))
    }

    pub const fn is_ipv6(&self) -> bool {
        matches!(self.0, IpAddr::V6(_))
    }

    /// Returns true if this is the all-zero address of either family.
    pub fn is_unspecified(&self) -> bool {
        self.0.is_unspecified()
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(IpAddress)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        IpAddress(addr)
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress(IpAddr::V4(addr))
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress(IpAddr::V6(addr))
    }
}

/// An IP prefix in CIDR notation.
///
/// The address is kept exactly as given: interface bindings carry a host
/// address inside the prefix (`10.0.0.1/31`) and must round-trip untouched.
/// [`IpPrefix::network`] computes the masked network address when the
/// network identity is what matters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IpPrefix {
    address: IpAddress,
    len: u8,
}

impl IpPrefix {
    /// Creates a prefix. Fails if `len` exceeds the address family's bit
    /// width.
    pub fn new(address: IpAddress, len: u8) -> Result<Self, ParseError> {
        let max = if address.is_ipv4() { 32 } else { 128 };
        if len > max {
            return Err(ParseError::InvalidIpPrefix(format!("{}/{}", address, len)));
        }
        Ok(IpPrefix { address, len })
    }

    /// Creates a host prefix (/32 or /128) for a single address.
    pub fn host(address: IpAddress) -> Self {
        let len = if address.is_ipv4() { 32 } else { 128 };
        IpPrefix { address, len }
    }

    pub const fn address(&self) -> IpAddress {
        self.address
    }

    /// The network address: host bits cleared.
    pub fn network(&self) -> IpAddress {
        match self.address.inner() {
            IpAddr::V4(a) => {
                let mask = if self.len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.len)
                };
                IpAddress(IpAddr::V4(Ipv4Addr::from(u32::from(a) & mask)))
            }
            IpAddr::V6(a) => {
                let mask = if self.len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.len)
                };
                IpAddress(IpAddr::V6(Ipv6Addr::from(u128::from(a) & mask)))
            }
        }
    }

    pub const fn len(&self) -> u8 {
        self.len
    }

    pub const fn is_ipv4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub const fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }

    /// Returns true for /32 (IPv4) or /128 (IPv6).
    pub fn is_host(&self) -> bool {
        self.len == if self.is_ipv4() { 32 } else { 128 }
    }

    pub fn is_default_route(&self) -> bool {
        self.len == 0
    }

    /// Returns true if `addr` falls inside this prefix.
    pub fn contains(&self, addr: &IpAddress) -> bool {
        if addr.is_ipv4() != self.is_ipv4() {
            return false;
        }
        match IpPrefix::new(*addr, self.len) {
            Ok(other) => other.network() == self.network(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((addr, len)) => {
                let address: IpAddress = addr
                    .parse()
                    .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
                let len: u8 = len
                    .parse()
                    .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
                IpPrefix::new(address, len)
            }
            // Bare addresses are accepted as host prefixes; the routing
            // daemon emits them for connected /32 routes.
            None => {
                let address: IpAddress = s
                    .parse()
                    .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;
                Ok(IpPrefix::host(address))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_addresses() {
        let v4: IpAddress = "10.0.0.1".parse().unwrap();
        assert!(v4.is_ipv4());
        let v6: IpAddress = "2001:db8::1".parse().unwrap();
        assert!(v6.is_ipv6());
        assert!("10.0.0.256".parse::<IpAddress>().is_err());
    }

    #[test]
    fn prefix_preserves_host_address() {
        let p: IpPrefix = "10.0.0.7/24".parse().unwrap();
        assert_eq!(p.to_string(), "10.0.0.7/24");
        assert_eq!(p.network().to_string(), "10.0.0.0");
        let q: IpPrefix = "10.0.0.0/24".parse().unwrap();
        assert_ne!(p, q);
        assert_eq!(p.network(), q.network());
    }

    #[test]
    fn prefix_contains() {
        let p: IpPrefix = "10.1.0.0/16".parse().unwrap();
        assert!(p.contains(&"10.1.2.3".parse().unwrap()));
        assert!(!p.contains(&"10.2.0.1".parse().unwrap()));
    }

    #[test]
    fn bare_address_is_host_prefix() {
        let p: IpPrefix = "192.0.2.1".parse().unwrap();
        assert!(p.is_host());
        assert_eq!(p.len(), 32);
        let p6: IpPrefix = "2001:db8::1".parse().unwrap();
        assert_eq!(p6.len(), 128);
    }

    #[test]
    fn invalid_lengths_rejected() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn default_route() {
        let p: IpPrefix = "0.0.0.0/0".parse().unwrap();
        assert!(p.is_default_route());
        assert!(p.contains(&"203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn address_ordering_is_total() {
        let mut addrs: Vec<IpAddress> = ["10.0.0.2", "10.0.0.1", "2001:db8::1"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        addrs.sort();
        assert_eq!(addrs[0].to_string(), "10.0.0.1");
    }
}
