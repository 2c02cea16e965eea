//! Next-hop keys and group keys.
//!
//! The textual forms are wire contract:
//!
//! - next hop: `[push|swap+<l0>/<l1>/..+]<ip>[@<alias>]` with an optional
//!   overlay tail `@<vni>@<mac>` (four `@`-separated fields total)
//! - group key: comma-separated next hops
//!
//! Example: `push+10100/10101+10.0.0.3@Ethernet4`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use switchd_types::{IpAddress, MacAddress};
use thiserror::Error;

const LABELSTACK_DELIMITER: char = '+';
const NH_DELIMITER: char = '@';
const NHG_DELIMITER: char = ',';

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid next hop '{text}': {reason}")]
pub struct NextHopParseError {
    pub text: String,
    pub reason: String,
}

impl NextHopParseError {
    fn new(text: &str, reason: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            reason: reason.into(),
        }
    }
}

/// MPLS out-segment operation of a labeled next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MplsAction {
    Swap,
    Push,
}

impl MplsAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MplsAction::Swap => "swap",
            MplsAction::Push => "push",
        }
    }
}

/// An MPLS label stack, rendered `label0/label1/..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LabelStack(pub Vec<u32>);

impl LabelStack {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for label in &self.0 {
            if !first {
                f.write_str("/")?;
            }
            write!(f, "{label}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for LabelStack {
    type Err = NextHopParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut labels = Vec::new();
        for part in s.split('/') {
            labels.push(
                part.parse::<u32>()
                    .map_err(|_| NextHopParseError::new(s, "bad label"))?,
            );
        }
        Ok(LabelStack(labels))
    }
}

/// Identity of a single next hop.
///
/// Total order over all fields so group keys are canonically ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHopKey {
    pub ip: IpAddress,
    /// Outgoing interface alias; empty when unresolved from config.
    pub alias: String,
    /// MPLS encapsulation, when labeled.
    pub labels: Option<(MplsAction, LabelStack)>,
    /// Overlay VNI; zero for underlay next hops.
    pub vni: u32,
    /// Overlay router MAC.
    pub mac: Option<MacAddress>,
}

impl NextHopKey {
    pub fn new(ip: IpAddress, alias: impl Into<String>) -> Self {
        Self {
            ip,
            alias: alias.into(),
            labels: None,
            vni: 0,
            mac: None,
        }
    }

    pub fn with_labels(mut self, action: MplsAction, stack: LabelStack) -> Self {
        self.labels = Some((action, stack));
        self
    }

    pub fn with_overlay(mut self, vni: u32, mac: MacAddress) -> Self {
        self.vni = vni;
        self.mac = Some(mac);
        self
    }

    pub fn is_labeled(&self) -> bool {
        self.labels.is_some()
    }

    pub fn is_overlay(&self) -> bool {
        self.vni != 0
    }

    /// The same next hop without its label stack; neighbor resolution is
    /// keyed on the plain IP next hop.
    pub fn unlabeled(&self) -> NextHopKey {
        NextHopKey {
            labels: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for NextHopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((action, stack)) = &self.labels {
            write!(
                f,
                "{}{}{}{}",
                action.as_str(),
                LABELSTACK_DELIMITER,
                stack,
                LABELSTACK_DELIMITER
            )?;
        }
        write!(f, "{}{}{}", self.ip, NH_DELIMITER, self.alias)?;
        if self.is_overlay() {
            write!(
                f,
                "{}{}{}{}",
                NH_DELIMITER,
                self.vni,
                NH_DELIMITER,
                self.mac.unwrap_or(MacAddress::ZERO)
            )?;
        }
        Ok(())
    }
}

impl FromStr for NextHopKey {
    type Err = NextHopParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(NHG_DELIMITER) {
            return Err(NextHopParseError::new(s, "group delimiter in next hop"));
        }

        // Optional MPLS prefix: "<swap|push>+<stack>+<rest>".
        let (labels, rest) = {
            let parts: Vec<&str> = s.split(LABELSTACK_DELIMITER).collect();
            match parts.len() {
                1 => (None, parts[0]),
                3 => {
                    let action = match parts[0] {
                        "swap" => MplsAction::Swap,
                        "push" => MplsAction::Push,
                        _ => return Err(NextHopParseError::new(s, "bad mpls action")),
                    };
                    (Some((action, parts[1].parse::<LabelStack>()?)), parts[2])
                }
                _ => return Err(NextHopParseError::new(s, "bad mpls form")),
            }
        };

        let fields: Vec<&str> = rest.split(NH_DELIMITER).collect();
        let parse_ip = |t: &str| {
            t.parse::<IpAddress>()
                .map_err(|_| NextHopParseError::new(s, "bad ip"))
        };
        let mut key = match fields.len() {
            1 => NextHopKey::new(parse_ip(fields[0])?, ""),
            2 => NextHopKey::new(parse_ip(fields[0])?, fields[1]),
            4 => {
                let vni: u32 = fields[2]
                    .parse()
                    .map_err(|_| NextHopParseError::new(s, "bad vni"))?;
                let mac: MacAddress = fields[3]
                    .parse()
                    .map_err(|_| NextHopParseError::new(s, "bad mac"))?;
                NextHopKey::new(parse_ip(fields[0])?, fields[1]).with_overlay(vni, mac)
            }
            _ => return Err(NextHopParseError::new(s, "bad field count")),
        };
        key.labels = labels;
        Ok(key)
    }
}

/// Ordered set of next hops with per-member weights.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NextHopGroupKey {
    members: BTreeMap<NextHopKey, u32>,
}

impl NextHopGroupKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(nh: NextHopKey) -> Self {
        let mut members = BTreeMap::new();
        members.insert(nh, 1);
        Self { members }
    }

    /// Parses `nhg_str` with an optional positional comma-separated weight
    /// list; missing or short weight lists default members to weight 1.
    pub fn with_weights(nhg_str: &str, weights: &str) -> Result<Self, NextHopParseError> {
        let weight_list: Vec<u32> = if weights.trim().is_empty() {
            Vec::new()
        } else {
            weights
                .split(NHG_DELIMITER)
                .map(|w| w.trim().parse::<u32>().unwrap_or(1))
                .collect()
        };

        let mut members = BTreeMap::new();
        if nhg_str.trim().is_empty() {
            return Ok(Self { members });
        }
        for (i, part) in nhg_str.split(NHG_DELIMITER).enumerate() {
            let nh: NextHopKey = part.trim().parse()?;
            let weight = weight_list.get(i).copied().unwrap_or(1);
            members.insert(nh, weight);
        }
        Ok(Self { members })
    }

    pub fn insert(&mut self, nh: NextHopKey, weight: u32) {
        self.members.insert(nh, weight);
    }

    pub fn contains(&self, nh: &NextHopKey) -> bool {
        self.members.contains_key(nh)
    }

    /// True when some member shares `nh`'s ip and alias, ignoring labels and
    /// overlay fields.
    pub fn contains_ip_alias(&self, nh: &NextHopKey) -> bool {
        self.members
            .keys()
            .any(|m| m.ip == nh.ip && m.alias == nh.alias)
    }

    pub fn is_superset_of(&self, other: &NextHopGroupKey) -> bool {
        other.members.keys().all(|nh| self.members.contains_key(nh))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_ecmp(&self) -> bool {
        self.members.len() > 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NextHopKey, u32)> {
        self.members.iter().map(|(nh, w)| (nh, *w))
    }

    pub fn next_hops(&self) -> impl Iterator<Item = &NextHopKey> {
        self.members.keys()
    }

    pub fn weight_of(&self, nh: &NextHopKey) -> Option<u32> {
        self.members.get(nh).copied()
    }

    pub fn has_labeled_member(&self) -> bool {
        self.members.keys().any(NextHopKey::is_labeled)
    }

    pub fn has_overlay_member(&self) -> bool {
        self.members.keys().any(NextHopKey::is_overlay)
    }
}

impl fmt::Display for NextHopGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for nh in self.members.keys() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{nh}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for NextHopGroupKey {
    type Err = NextHopParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::with_weights(s, "")
    }
}

/// Builds a group key from the separated `nexthop`/`ifname`/`weight`/
/// `mpls_nh` fields of a route or group row. `na` in the mpls list means no
/// labels for that member.
pub fn group_key_from_fields(
    ips: &str,
    aliases: &str,
    weights: &str,
    mpls: &str,
) -> Result<NextHopGroupKey, NextHopParseError> {
    let ip_list: Vec<&str> = if ips.is_empty() {
        Vec::new()
    } else {
        ips.split(NHG_DELIMITER).collect()
    };
    let alias_list: Vec<&str> = aliases.split(NHG_DELIMITER).collect();
    let mpls_list: Vec<&str> = if mpls.is_empty() {
        Vec::new()
    } else {
        mpls.split(NHG_DELIMITER).collect()
    };

    let mut nhg_str = String::new();
    for (i, ip) in ip_list.iter().enumerate() {
        if i > 0 {
            nhg_str.push(NHG_DELIMITER);
        }
        if let Some(labels) = mpls_list.get(i) {
            if *labels != "na" {
                nhg_str.push_str(labels);
                nhg_str.push(LABELSTACK_DELIMITER);
            }
        }
        nhg_str.push_str(ip);
        nhg_str.push(NH_DELIMITER);
        nhg_str.push_str(alias_list.get(i).copied().unwrap_or(""));
    }
    NextHopGroupKey::with_weights(&nhg_str, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_next_hop_round_trip() {
        let nh: NextHopKey = "10.0.0.3@Ethernet4".parse().unwrap();
        assert_eq!(nh.ip.to_string(), "10.0.0.3");
        assert_eq!(nh.alias, "Ethernet4");
        assert!(!nh.is_labeled());
        assert_eq!(nh.to_string(), "10.0.0.3@Ethernet4");
    }

    #[test]
    fn labeled_next_hop_round_trip() {
        let nh: NextHopKey = "push+10100/10101+10.0.0.3@Ethernet4".parse().unwrap();
        assert!(nh.is_labeled());
        let (action, stack) = nh.labels.clone().unwrap();
        assert_eq!(action, MplsAction::Push);
        assert_eq!(stack.0, vec![10100, 10101]);
        assert_eq!(nh.to_string(), "push+10100/10101+10.0.0.3@Ethernet4");
    }

    #[test]
    fn overlay_next_hop_round_trip() {
        let nh: NextHopKey = "10.1.0.5@Ethernet8@5000@00:11:22:33:44:55"
            .parse()
            .unwrap();
        assert!(nh.is_overlay());
        assert_eq!(nh.vni, 5000);
        assert_eq!(
            nh.to_string(),
            "10.1.0.5@Ethernet8@5000@00:11:22:33:44:55"
        );
    }

    #[test]
    fn malformed_next_hops_rejected() {
        for bad in [
            "10.0.0.1,10.0.0.2",
            "hop+1+10.0.0.1@e0",
            "push+abc+10.0.0.1@e0",
            "10.0.0.1@e0@5000",
            "nonsense",
        ] {
            assert!(bad.parse::<NextHopKey>().is_err(), "{bad}");
        }
    }

    #[test]
    fn group_key_is_order_insensitive() {
        let a: NextHopGroupKey = "10.0.0.2@Ethernet4,10.0.0.1@Ethernet0".parse().unwrap();
        let b: NextHopGroupKey = "10.0.0.1@Ethernet0,10.0.0.2@Ethernet4".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "10.0.0.1@Ethernet0,10.0.0.2@Ethernet4");
    }

    #[test]
    fn group_key_from_route_fields() {
        let key = group_key_from_fields(
            "10.0.0.1,10.0.0.2",
            "Ethernet0,Ethernet4",
            "3,5",
            "na,push+200",
        )
        .unwrap();
        assert_eq!(key.len(), 2);

        let plain: NextHopKey = "10.0.0.1@Ethernet0".parse().unwrap();
        assert_eq!(key.weight_of(&plain), Some(3));

        let labeled: NextHopKey = "push+200+10.0.0.2@Ethernet4".parse().unwrap();
        assert!(key.contains(&labeled));
        assert_eq!(key.weight_of(&labeled), Some(5));
        assert!(key.has_labeled_member());
    }

    #[test]
    fn superset_check() {
        let full: NextHopGroupKey = "10.0.0.1@e0,10.0.0.2@e1".parse().unwrap();
        let single = NextHopGroupKey::single("10.0.0.2@e1".parse().unwrap());
        assert!(full.is_superset_of(&single));
        let other = NextHopGroupKey::single("10.0.0.9@e1".parse().unwrap());
        assert!(!full.is_superset_of(&other));
    }

    #[test]
    fn contains_by_ip_alias_ignores_encap() {
        let key: NextHopGroupKey = "push+100+10.0.0.1@e0".parse().unwrap();
        let plain: NextHopKey = "10.0.0.1@e0".parse().unwrap();
        assert!(!key.contains(&plain));
        assert!(key.contains_ip_alias(&plain));
    }
}
