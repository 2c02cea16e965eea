//! Recording mock adapter.
//!
//! Backs every orchestrator test and the virtual platform. Records each call
//! so tests can count bucket writes, remembers the bucket-to-next-hop map,
//! and can be told to fail specific operations.

use crate::adapter::{AsicAdapter, NhGroupKind, Platform};
use crate::error::{AsicError, AsicResult};
use crate::types::{NextHopOid, NhGroupMemberOid, NhGroupOid};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// One recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedOp {
    CreateGroup { group: u64, fine_grained: bool },
    RemoveGroup { group: u64 },
    CreateMember { group: u64, member: u64, next_hop: u64, index: Option<u32> },
    RemoveMember { member: u64 },
    SetMemberNextHop { member: u64, next_hop: u64 },
    SetMemberWeight { member: u64, weight: u32 },
}

#[derive(Default)]
struct State {
    next_oid: u64,
    groups: HashSet<u64>,
    /// member -> (group, current next hop)
    members: HashMap<u64, (u64, u64)>,
    ops: Vec<RecordedOp>,
    fail_ops: HashSet<&'static str>,
}

/// Mock driver with configurable platform and capacity.
pub struct MockAsic {
    platform: Platform,
    max_ecmp_groups: u32,
    real_bucket_size: Option<u32>,
    state: Mutex<State>,
}

impl MockAsic {
    pub fn new() -> Self {
        Self {
            platform: Platform::Virtual,
            max_ecmp_groups: 512,
            real_bucket_size: None,
            state: Mutex::new(State {
                next_oid: 0x1000,
                ..State::default()
            }),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_max_ecmp_groups(mut self, max: u32) -> Self {
        self.max_ecmp_groups = max;
        self
    }

    /// Overrides the bucket count returned by [`AsicAdapter::real_bucket_size`].
    pub fn with_real_bucket_size(mut self, size: u32) -> Self {
        self.real_bucket_size = Some(size);
        self
    }

    /// Makes the named operation fail with rc -1 until cleared.
    pub fn fail_on(&self, operation: &'static str) {
        self.state.lock().unwrap().fail_ops.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_ops.clear();
    }

    pub fn ops(&self) -> Vec<RecordedOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    /// Number of bucket writes (member retargets) recorded so far.
    pub fn bucket_write_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .ops
            .iter()
            .filter(|op| matches!(op, RecordedOp::SetMemberNextHop { .. }))
            .count()
    }

    /// Current next hop of every live member, keyed by member id.
    pub fn member_targets(&self) -> BTreeMap<u64, u64> {
        self.state
            .lock()
            .unwrap()
            .members
            .iter()
            .map(|(member, (_, nh))| (*member, *nh))
            .collect()
    }

    pub fn live_group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    fn check_fail(state: &State, operation: &'static str) -> AsicResult<()> {
        if state.fail_ops.contains(operation) {
            Err(AsicError::call(operation, -1))
        } else {
            Ok(())
        }
    }

    fn alloc(state: &mut State) -> u64 {
        state.next_oid += 1;
        state.next_oid
    }
}

impl Default for MockAsic {
    fn default() -> Self {
        Self::new()
    }
}

impl AsicAdapter for MockAsic {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn max_ecmp_groups(&self) -> u32 {
        self.max_ecmp_groups
    }

    fn create_next_hop_group(&self, kind: NhGroupKind) -> AsicResult<NhGroupOid> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "create_next_hop_group")?;
        let oid = Self::alloc(&mut state);
        state.groups.insert(oid);
        state.ops.push(RecordedOp::CreateGroup {
            group: oid,
            fine_grained: matches!(kind, NhGroupKind::FineGrainEcmp { .. }),
        });
        Ok(NhGroupOid::from_raw(oid))
    }

    fn remove_next_hop_group(&self, group: NhGroupOid) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "remove_next_hop_group")?;
        if !state.groups.remove(&group.raw()) {
            return Err(AsicError::UnknownObject {
                operation: "remove_next_hop_group".to_string(),
                oid: group.raw(),
            });
        }
        state.ops.push(RecordedOp::RemoveGroup { group: group.raw() });
        Ok(())
    }

    fn real_bucket_size(&self, group: NhGroupOid) -> AsicResult<u32> {
        let state = self.state.lock().unwrap();
        Self::check_fail(&state, "real_bucket_size")?;
        if !state.groups.contains(&group.raw()) {
            return Err(AsicError::UnknownObject {
                operation: "real_bucket_size".to_string(),
                oid: group.raw(),
            });
        }
        self.real_bucket_size.ok_or(AsicError::UnsupportedAttribute {
            attribute: "real_bucket_size".to_string(),
        })
    }

    fn create_group_member(
        &self,
        group: NhGroupOid,
        next_hop: NextHopOid,
        index: Option<u32>,
        _weight: Option<u32>,
    ) -> AsicResult<NhGroupMemberOid> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "create_group_member")?;
        if !state.groups.contains(&group.raw()) {
            return Err(AsicError::UnknownObject {
                operation: "create_group_member".to_string(),
                oid: group.raw(),
            });
        }
        let oid = Self::alloc(&mut state);
        state.members.insert(oid, (group.raw(), next_hop.raw()));
        state.ops.push(RecordedOp::CreateMember {
            group: group.raw(),
            member: oid,
            next_hop: next_hop.raw(),
            index,
        });
        Ok(NhGroupMemberOid::from_raw(oid))
    }

    fn remove_group_member(&self, member: NhGroupMemberOid) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "remove_group_member")?;
        if state.members.remove(&member.raw()).is_none() {
            return Err(AsicError::UnknownObject {
                operation: "remove_group_member".to_string(),
                oid: member.raw(),
            });
        }
        state.ops.push(RecordedOp::RemoveMember { member: member.raw() });
        Ok(())
    }

    fn set_member_next_hop(
        &self,
        member: NhGroupMemberOid,
        next_hop: NextHopOid,
    ) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "set_member_next_hop")?;
        match state.members.get_mut(&member.raw()) {
            Some((_, nh)) => *nh = next_hop.raw(),
            None => {
                return Err(AsicError::UnknownObject {
                    operation: "set_member_next_hop".to_string(),
                    oid: member.raw(),
                })
            }
        }
        state.ops.push(RecordedOp::SetMemberNextHop {
            member: member.raw(),
            next_hop: next_hop.raw(),
        });
        Ok(())
    }

    fn set_member_weight(&self, member: NhGroupMemberOid, weight: u32) -> AsicResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&state, "set_member_weight")?;
        if !state.members.contains_key(&member.raw()) {
            return Err(AsicError::UnknownObject {
                operation: "set_member_weight".to_string(),
                oid: member.raw(),
            });
        }
        state.ops.push(RecordedOp::SetMemberWeight {
            member: member.raw(),
            weight,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn records_group_and_member_lifecycle() {
        let asic = MockAsic::new();
        let group = asic
            .create_next_hop_group(NhGroupKind::FineGrainEcmp { configured_size: 30 })
            .unwrap();
        let nh = NextHopOid::from_raw(0x9001);
        let member = asic.create_group_member(group, nh, Some(0), None).unwrap();

        asic.set_member_next_hop(member, NextHopOid::from_raw(0x9002))
            .unwrap();
        assert_eq!(asic.bucket_write_count(), 1);
        assert_eq!(asic.member_targets()[&member.raw()], 0x9002);

        asic.remove_group_member(member).unwrap();
        asic.remove_next_hop_group(group).unwrap();
        assert_eq!(asic.live_group_count(), 0);
    }

    #[test]
    fn failure_injection() {
        let asic = MockAsic::new();
        asic.fail_on("create_next_hop_group");
        assert!(asic.create_next_hop_group(NhGroupKind::Ecmp).is_err());
        asic.clear_failures();
        assert!(asic.create_next_hop_group(NhGroupKind::Ecmp).is_ok());
    }

    #[test]
    fn real_bucket_size_needs_configuration() {
        let asic = MockAsic::new();
        let group = asic.create_next_hop_group(NhGroupKind::Ecmp).unwrap();
        assert!(asic.real_bucket_size(group).is_err());

        let asic = MockAsic::new().with_real_bucket_size(64);
        let group = asic.create_next_hop_group(NhGroupKind::Ecmp).unwrap();
        assert_eq!(asic.real_bucket_size(group).unwrap(), 64);
    }
}
