//! VLAN identifier type.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier.
///
/// Valid range is 1-4094 (0 and 4095 are reserved). User-configurable VLANs
/// start at [`VlanId::MIN_USER`]; VLAN 1 is the kernel bridge default and is
/// only touched by the bridge bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// Lowest id accepted from user configuration.
    pub const MIN_USER: u16 = 2;

    /// The bridge default VLAN.
    pub const DEFAULT: VlanId = VlanId(1);

    pub fn new(id: u16) -> Result<Self, ParseError> {
        if (Self::MIN..=Self::MAX).contains(&id) {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id.to_string()))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true if the id is in the user-configurable range.
    pub const fn is_user(&self) -> bool {
        self.0 >= Self::MIN_USER
    }

    /// Store key form, `Vlan<N>`.
    pub fn alias(&self) -> String {
        format!("Vlan{}", self.0)
    }

    /// Parses a `Vlan<N>` alias key.
    pub fn from_alias(alias: &str) -> Result<Self, ParseError> {
        let digits = alias
            .strip_prefix("Vlan")
            .ok_or_else(|| ParseError::InvalidVlanId(alias.to_string()))?;
        digits.parse()
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u16 = s
            .parse()
            .map_err(|_| ParseError::InvalidVlanId(s.to_string()))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_enforced() {
        assert!(VlanId::new(0).is_err());
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert!(VlanId::new(4095).is_err());
    }

    #[test]
    fn alias_round_trip() {
        let v = VlanId::from_alias("Vlan100").unwrap();
        assert_eq!(v.as_u16(), 100);
        assert_eq!(v.alias(), "Vlan100");
        assert!(VlanId::from_alias("Ethernet0").is_err());
        assert!(VlanId::from_alias("Vlanx").is_err());
    }

    #[test]
    fn user_range() {
        assert!(!VlanId::DEFAULT.is_user());
        assert!(VlanId::new(2).unwrap().is_user());
    }
}
