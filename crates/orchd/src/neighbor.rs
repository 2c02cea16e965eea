//! Resolved-neighbor state shared by the group orchestrators.
//!
//! Stands where the neighbor orchestrator's next-hop table would: which next
//! hops have a driver id, per-next-hop reference counts, and which interfaces
//! are down. Both group orchestrators hold the same handle through the
//! directory; lookups are by key, never by pointer.

use crate::nexthop::NextHopKey;
use std::collections::{HashMap, HashSet};
use switchd_asic::NextHopOid;
use switchd_types::IpAddress;

#[derive(Default)]
pub struct NeighborTable {
    /// Next hops with a live driver object.
    resolved: HashMap<NextHopKey, NextHopOid>,
    ref_counts: HashMap<NextHopKey, u32>,
    /// Aliases whose interface is operationally down.
    down_interfaces: HashSet<String>,
    next_synthetic_oid: u64,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self {
            next_synthetic_oid: 0x9000,
            ..Self::default()
        }
    }

    /// Marks a next hop resolved with its driver id.
    pub fn resolve(&mut self, nh: NextHopKey, oid: NextHopOid) {
        self.resolved.insert(nh, oid);
    }

    /// Marks a next hop resolved, minting a driver id for it.
    pub fn resolve_new(&mut self, nh: NextHopKey) -> NextHopOid {
        if let Some(oid) = self.resolved.get(&nh) {
            return *oid;
        }
        self.next_synthetic_oid += 1;
        let oid = NextHopOid::from_raw(self.next_synthetic_oid);
        self.resolved.insert(nh, oid);
        oid
    }

    /// Creates a labeled next hop over an already-resolved plain neighbor.
    /// Driver ids for these are owned here too.
    pub fn add_labeled_next_hop(&mut self, nh: NextHopKey) -> Option<NextHopOid> {
        if !nh.is_labeled() || !self.is_neighbor_resolved(&nh) {
            return None;
        }
        self.next_synthetic_oid += 1;
        let oid = NextHopOid::from_raw(self.next_synthetic_oid);
        self.resolved.insert(nh, oid);
        Some(oid)
    }

    pub fn unresolve(&mut self, nh: &NextHopKey) {
        self.resolved.remove(nh);
    }

    /// True when this exact next hop has a driver id.
    pub fn has_next_hop(&self, nh: &NextHopKey) -> bool {
        self.resolved.contains_key(nh)
    }

    /// True when the underlying neighbor is resolved, disregarding labels.
    pub fn is_neighbor_resolved(&self, nh: &NextHopKey) -> bool {
        self.resolved.contains_key(&nh.unlabeled())
    }

    pub fn next_hop_id(&self, nh: &NextHopKey) -> Option<NextHopOid> {
        self.resolved.get(nh).copied()
    }

    /// Finds the resolved next hop for a bare neighbor ip.
    pub fn next_hop_by_ip(&self, ip: &IpAddress) -> Option<NextHopKey> {
        self.resolved
            .keys()
            .find(|nh| nh.ip == *ip && !nh.is_labeled())
            .cloned()
    }

    pub fn increase_ref(&mut self, nh: &NextHopKey) {
        *self.ref_counts.entry(nh.clone()).or_insert(0) += 1;
    }

    pub fn decrease_ref(&mut self, nh: &NextHopKey) {
        if let Some(count) = self.ref_counts.get_mut(nh) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn ref_count(&self, nh: &NextHopKey) -> u32 {
        self.ref_counts.get(nh).copied().unwrap_or(0)
    }

    pub fn set_interface_down(&mut self, alias: &str, down: bool) {
        if down {
            self.down_interfaces.insert(alias.to_string());
        } else {
            self.down_interfaces.remove(alias);
        }
    }

    pub fn is_interface_down(&self, nh: &NextHopKey) -> bool {
        self.down_interfaces.contains(&nh.alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nh(s: &str) -> NextHopKey {
        s.parse().unwrap()
    }

    #[test]
    fn resolve_and_lookup() {
        let mut table = NeighborTable::new();
        table.resolve(nh("10.0.0.1@Ethernet0"), NextHopOid::from_raw(0x31));

        assert!(table.has_next_hop(&nh("10.0.0.1@Ethernet0")));
        assert!(!table.has_next_hop(&nh("10.0.0.2@Ethernet0")));
        assert_eq!(
            table.next_hop_id(&nh("10.0.0.1@Ethernet0")),
            Some(NextHopOid::from_raw(0x31))
        );
        assert_eq!(
            table.next_hop_by_ip(&"10.0.0.1".parse().unwrap()),
            Some(nh("10.0.0.1@Ethernet0"))
        );
    }

    #[test]
    fn labeled_next_hop_over_resolved_neighbor() {
        let mut table = NeighborTable::new();
        let labeled = nh("push+100+10.0.0.1@Ethernet0");

        // Cannot create the labeled hop before the neighbor resolves.
        assert!(table.add_labeled_next_hop(labeled.clone()).is_none());

        table.resolve(nh("10.0.0.1@Ethernet0"), NextHopOid::from_raw(0x31));
        assert!(table.is_neighbor_resolved(&labeled));
        let oid = table.add_labeled_next_hop(labeled.clone()).unwrap();
        assert!(!oid.is_null());
        assert!(table.has_next_hop(&labeled));
    }

    #[test]
    fn ref_counting_saturates() {
        let mut table = NeighborTable::new();
        let key = nh("10.0.0.1@Ethernet0");
        table.increase_ref(&key);
        table.increase_ref(&key);
        assert_eq!(table.ref_count(&key), 2);
        table.decrease_ref(&key);
        table.decrease_ref(&key);
        table.decrease_ref(&key);
        assert_eq!(table.ref_count(&key), 0);
    }

    #[test]
    fn interface_down_flags() {
        let mut table = NeighborTable::new();
        table.set_interface_down("Ethernet0", true);
        assert!(table.is_interface_down(&nh("10.0.0.1@Ethernet0")));
        table.set_interface_down("Ethernet0", false);
        assert!(!table.is_interface_down(&nh("10.0.0.1@Ethernet0")));
    }
}
