//! Next-hop group state.

use crate::nexthop::{NextHopGroupKey, NextHopKey};
use std::collections::BTreeMap;
use switchd_asic::{NextHopOid, NhGroupMemberOid, NhGroupOid, RawObjectId};

/// The driver identity of a group.
///
/// Multi-member groups own a driver group object; single-member groups are
/// an alias to the member's next-hop id and own nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupId {
    #[default]
    Unsynced,
    Group(NhGroupOid),
    Alias(NextHopOid),
}

impl GroupId {
    pub fn raw(&self) -> Option<RawObjectId> {
        match self {
            GroupId::Unsynced => None,
            GroupId::Group(oid) => Some(oid.raw()),
            GroupId::Alias(oid) => Some(oid.raw()),
        }
    }

    pub fn is_synced(&self) -> bool {
        !matches!(self, GroupId::Unsynced)
    }

    pub fn group_oid(&self) -> Option<NhGroupOid> {
        match self {
            GroupId::Group(oid) => Some(*oid),
            _ => None,
        }
    }
}

/// One member of a group and its driver slot.
#[derive(Debug, Clone)]
pub struct NhgMember {
    pub key: NextHopKey,
    pub weight: u32,
    /// Null until the member is programmed.
    pub member_id: NhGroupMemberOid,
}

impl NhgMember {
    pub fn new(key: NextHopKey, weight: u32) -> Self {
        Self {
            key,
            weight,
            member_id: NhGroupMemberOid::NULL,
        }
    }

    pub fn is_synced(&self) -> bool {
        !self.member_id.is_null()
    }
}

/// A next-hop group and its programming state.
#[derive(Debug, Clone, Default)]
pub struct NextHopGroup {
    pub key: NextHopGroupKey,
    pub id: GroupId,
    pub members: BTreeMap<NextHopKey, NhgMember>,
    /// Temporary groups stand in for the full group under capacity
    /// pressure; their id may change at any time.
    pub is_temp: bool,
}

impl NextHopGroup {
    pub fn new(key: NextHopGroupKey) -> Self {
        let members = key
            .iter()
            .map(|(nh, weight)| (nh.clone(), NhgMember::new(nh.clone(), weight)))
            .collect();
        Self {
            key,
            id: GroupId::Unsynced,
            members,
            is_temp: false,
        }
    }

    pub fn temp(key: NextHopGroupKey) -> Self {
        let mut group = Self::new(key);
        group.is_temp = true;
        group
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_synced(&self) -> bool {
        self.id.is_synced()
    }

    pub fn has_member(&self, nh: &NextHopKey) -> bool {
        self.members.contains_key(nh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn group_builds_members_from_key() {
        let key: NextHopGroupKey = "10.0.0.1@e0,10.0.0.2@e1".parse().unwrap();
        let group = NextHopGroup::new(key);
        assert_eq!(group.size(), 2);
        assert!(!group.is_synced());
        assert!(group.members.values().all(|m| !m.is_synced()));
    }

    #[test]
    fn group_id_forms() {
        assert_eq!(GroupId::Unsynced.raw(), None);
        assert_eq!(
            GroupId::Group(NhGroupOid::from_raw(0x40)).raw(),
            Some(0x40)
        );
        assert_eq!(
            GroupId::Alias(NextHopOid::from_raw(0x30)).raw(),
            Some(0x30)
        );
        assert!(GroupId::Group(NhGroupOid::from_raw(1)).group_oid().is_some());
        assert!(GroupId::Alias(NextHopOid::from_raw(1)).group_oid().is_none());
    }
}
