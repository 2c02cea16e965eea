//! The next-hop group orchestrator.

use crate::neighbor::NeighborTable;
use crate::nexthop::{group_key_from_fields, NextHopGroupKey, NextHopKey};
use crate::tables::{APP_NEXTHOP_GROUP_TABLE, STATE_SWITCH_CAPABILITY_TABLE};
use crate::nhg::types::{GroupId, NextHopGroup, NhgMember};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchd_asic::{
    AsicAdapter, NhGroupKind, Platform, DEFAULT_MAX_ECMP_GROUP_SIZE,
};
use switchd_orch_common::{
    ApplyOutcome, Engine, KeyOpFieldsValues, Store, TaskError,
};
use tracing::{info, warn};

struct NhgEntry {
    group: NextHopGroup,
    ref_count: u32,
}

pub struct NhgOrch {
    engine: Engine,
    asic: Arc<dyn AsicAdapter>,
    neighbors: Arc<Mutex<NeighborTable>>,
    groups: HashMap<String, NhgEntry>,
    /// Groups the driver can hold, after platform scaling.
    max_group_count: u32,
    /// Driver group objects currently programmed.
    synced_group_count: u32,
}

impl NhgOrch {
    /// Queries driver capacity, applies the platform quirk, and publishes
    /// the resulting capability.
    pub async fn new(
        store: &dyn Store,
        asic: Arc<dyn AsicAdapter>,
        neighbors: Arc<Mutex<NeighborTable>>,
    ) -> Self {
        let mut max_group_count = asic.max_ecmp_groups();
        if asic.platform() == Platform::MellanoxLike {
            // Reported capacity assumes size-1 groups on these platforms.
            max_group_count /= DEFAULT_MAX_ECMP_GROUP_SIZE;
        }
        if let Err(e) = store
            .set(
                STATE_SWITCH_CAPABILITY_TABLE,
                "switch",
                vec![(
                    "MAX_NEXTHOP_GROUP_COUNT".to_string(),
                    max_group_count.to_string(),
                )],
            )
            .await
        {
            warn!(error = %e, "failed to publish group capacity");
        }
        info!(max_group_count, "next-hop group capacity");

        let mut engine = Engine::new();
        engine.register_table(APP_NEXTHOP_GROUP_TABLE);
        Self {
            engine,
            asic,
            neighbors,
            groups: HashMap::new(),
            max_group_count,
            synced_group_count: 0,
        }
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn group_count(&self) -> u32 {
        self.synced_group_count
    }

    pub fn has_group(&self, index: &str) -> bool {
        self.groups.contains_key(index)
    }

    pub fn is_temp(&self, index: &str) -> bool {
        self.groups
            .get(index)
            .map(|e| e.group.is_temp)
            .unwrap_or(false)
    }

    /// Driver id referenced objects should program. Callers referencing a
    /// temporary group must re-query after every update.
    pub fn group_driver_id(&self, index: &str) -> Option<u64> {
        self.groups.get(index).and_then(|e| e.group.id.raw())
    }

    pub fn increment_ref(&mut self, index: &str) {
        if let Some(entry) = self.groups.get_mut(index) {
            entry.ref_count += 1;
        }
    }

    pub fn decrement_ref(&mut self, index: &str) {
        if let Some(entry) = self.groups.get_mut(index) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    pub fn ref_count(&self, index: &str) -> u32 {
        self.groups.get(index).map(|e| e.ref_count).unwrap_or(0)
    }

    /// Drives all pending group table work once. Returns the keys retired
    /// this round, for replay tracking.
    pub async fn drain(&mut self) -> Vec<String> {
        let mut retired = Vec::new();
        let batch = self.engine.take_pending(APP_NEXTHOP_GROUP_TABLE);
        for entry in batch {
            let outcome = self.apply(&entry);
            if !outcome.is_retry() {
                retired.push(entry.key.clone());
            }
            self.engine.complete(APP_NEXTHOP_GROUP_TABLE, entry, outcome);
        }
        retired
    }

    /// Applies one group table entry.
    pub fn apply(&mut self, entry: &KeyOpFieldsValues) -> ApplyOutcome {
        let index = entry.key.clone();
        if entry.op.is_set() {
            let nhg_key = match group_key_from_fields(
                entry.field_or("nexthop", ""),
                entry.field_or("ifname", ""),
                entry.field_or("weight", ""),
                entry.field_or("mpls_nh", ""),
            ) {
                Ok(key) => key,
                Err(e) => {
                    warn!(index = %index, error = %e, "malformed group key");
                    return ApplyOutcome::Error;
                }
            };
            self.apply_set(&index, nhg_key)
        } else {
            self.apply_del(&index)
        }
    }

    fn apply_set(&mut self, index: &str, nhg_key: NextHopGroupKey) -> ApplyOutcome {
        if !self.groups.contains_key(index) {
            // A new group that needs a driver object while the table is
            // full gets a temporary single-member stand-in; the entry stays
            // pending so the full group keeps being attempted.
            if nhg_key.len() > 1 && self.synced_group_count >= self.max_group_count {
                warn!(index, "next-hop group count reached its limit");
                match self.create_temp_group(&nhg_key) {
                    Ok(mut group) => {
                        if let Err(e) = self.sync_group(&mut group) {
                            warn!(index, error = %e, "failed to sync temporary group");
                        } else {
                            self.groups.insert(
                                index.to_string(),
                                NhgEntry {
                                    group,
                                    ref_count: 0,
                                },
                            );
                        }
                    }
                    Err(e) => {
                        warn!(index, error = %e, "cannot build temporary group");
                    }
                }
                return ApplyOutcome::Retry;
            }

            let mut group = NextHopGroup::new(nhg_key);
            match self.sync_group(&mut group) {
                Ok(()) => {
                    self.groups.insert(
                        index.to_string(),
                        NhgEntry {
                            group,
                            ref_count: 0,
                        },
                    );
                    ApplyOutcome::Done
                }
                Err(e) => {
                    info!(index, error = %e, "group not synced yet");
                    ApplyOutcome::Retry
                }
            }
        } else {
            let (is_temp, old_size, ref_count, old_key) = {
                let entry = self.groups.get(index).expect("checked above");
                (
                    entry.group.is_temp,
                    entry.group.size(),
                    entry.ref_count,
                    entry.group.key.clone(),
                )
            };

            // An update may not change the driver id of a referenced group;
            // the referencing objects would never hear about it. Temporary
            // groups are the exception: their users re-query by contract.
            if !is_temp && (nhg_key.len() == 1 || old_size == 1) && ref_count > 0 {
                warn!(
                    index,
                    "update would change the driver id of a referenced group, deferred"
                );
                return ApplyOutcome::Retry;
            }

            if is_temp && nhg_key.len() > 1 && self.synced_group_count >= self.max_group_count {
                // Still no room to promote. If the chosen member fell out of
                // the new key, re-pick so the stand-in stays representative.
                if !nhg_key.is_superset_of(&old_key) {
                    match self.create_temp_group(&nhg_key) {
                        Ok(mut new_group) => {
                            if self.sync_group(&mut new_group).is_ok() {
                                // Only the group is replaced; the ref count
                                // carries over untouched.
                                self.groups.get_mut(index).expect("checked above").group =
                                    new_group;
                            }
                        }
                        Err(e) => {
                            warn!(index, error = %e, "cannot rebuild temporary group")
                        }
                    }
                }
                return ApplyOutcome::Retry;
            }

            let mut group = std::mem::take(&mut self.groups.get_mut(index).expect("checked").group);
            let result = self.update_group(&mut group, nhg_key);
            self.groups.get_mut(index).expect("checked").group = group;
            match result {
                Ok(()) => ApplyOutcome::Done,
                Err(e) => {
                    info!(index, error = %e, "group update deferred");
                    ApplyOutcome::Retry
                }
            }
        }
    }

    fn apply_del(&mut self, index: &str) -> ApplyOutcome {
        match self.groups.get(index) {
            None => {
                warn!(index, "delete for unknown group");
                ApplyOutcome::Done
            }
            Some(entry) if entry.ref_count > 0 => {
                warn!(index, ref_count = entry.ref_count, "group still referenced");
                ApplyOutcome::Retry
            }
            Some(_) => {
                let mut entry = self.groups.remove(index).expect("checked above");
                match self.remove_group(&mut entry.group) {
                    Ok(()) => ApplyOutcome::Done,
                    Err(e) => {
                        warn!(index, error = %e, "group removal failed");
                        self.groups.insert(index.to_string(), entry);
                        ApplyOutcome::Retry
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Neighbor transitions
    // ------------------------------------------------------------------

    /// Syncs `nh` in every group containing it. Exits on the first failure:
    /// later groups would fail for the same reason.
    pub fn validate_next_hop(&mut self, nh: &NextHopKey) -> Result<(), TaskError> {
        let indexes: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, e)| e.group.has_member(nh))
            .map(|(i, _)| i.clone())
            .collect();
        for index in indexes {
            let mut group =
                std::mem::take(&mut self.groups.get_mut(&index).expect("collected").group);
            let result = if group.size() == 1 {
                // Single-member groups only borrow the neighbor's id.
                Ok(())
            } else {
                self.sync_members(&mut group, &[nh.clone()])
            };
            self.groups.get_mut(&index).expect("collected").group = group;
            result?;
        }
        Ok(())
    }

    /// Removes `nh` from every group containing it.
    pub fn invalidate_next_hop(&mut self, nh: &NextHopKey) -> Result<(), TaskError> {
        let indexes: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, e)| e.group.has_member(nh))
            .map(|(i, _)| i.clone())
            .collect();
        for index in indexes {
            let mut group =
                std::mem::take(&mut self.groups.get_mut(&index).expect("collected").group);
            let result = if group.size() == 1 {
                Ok(())
            } else {
                self.remove_members(&mut group, &[nh.clone()])
            };
            self.groups.get_mut(&index).expect("collected").group = group;
            result?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group programming
    // ------------------------------------------------------------------

    /// Resolves the driver id of a member's next hop, creating the labeled
    /// next hop over an already-resolved neighbor when needed.
    fn member_nh_id(&self, nh: &NextHopKey) -> Option<switchd_asic::NextHopOid> {
        let mut neighbors = self.neighbors.lock().unwrap();
        if let Some(oid) = neighbors.next_hop_id(nh) {
            return Some(oid);
        }
        if nh.is_labeled() {
            return neighbors.add_labeled_next_hop(nh.clone());
        }
        None
    }

    fn sync_group(&mut self, group: &mut NextHopGroup) -> Result<(), TaskError> {
        if group.is_synced() {
            return Ok(());
        }
        if group.size() == 1 {
            let nh = group.members.keys().next().expect("size checked").clone();
            let nh_id = self
                .member_nh_id(&nh)
                .ok_or_else(|| TaskError::precondition(format!("next hop {nh}")))?;
            group.id = GroupId::Alias(nh_id);
            Ok(())
        } else {
            let oid = self
                .asic
                .create_next_hop_group(NhGroupKind::Ecmp)
                .map_err(|e| TaskError::driver("create_next_hop_group", e.to_string()))?;
            group.id = GroupId::Group(oid);
            self.synced_group_count += 1;
            let keys: Vec<NextHopKey> = group.members.keys().cloned().collect();
            self.sync_members(group, &keys)
        }
    }

    fn sync_members(
        &mut self,
        group: &mut NextHopGroup,
        nh_keys: &[NextHopKey],
    ) -> Result<(), TaskError> {
        let group_oid = group
            .id
            .group_oid()
            .ok_or_else(|| TaskError::driver("sync_members", "group not synced".to_string()))?;
        for nh in nh_keys {
            let member = match group.members.get_mut(nh) {
                Some(m) => m,
                None => continue,
            };
            if member.is_synced() {
                continue;
            }
            let nh_id = self
                .member_nh_id(nh)
                .ok_or_else(|| TaskError::precondition(format!("next hop {nh}")))?;
            if self.neighbors.lock().unwrap().is_interface_down(nh) {
                warn!(nh = %nh, "skipping member, interface is down");
                continue;
            }
            let member_id = self
                .asic
                .create_group_member(group_oid, nh_id, None, Some(member.weight))
                .map_err(|e| TaskError::driver("create_group_member", e.to_string()))?;
            member.member_id = member_id;
            self.neighbors.lock().unwrap().increase_ref(nh);
        }
        Ok(())
    }

    fn remove_members(
        &mut self,
        group: &mut NextHopGroup,
        nh_keys: &[NextHopKey],
    ) -> Result<(), TaskError> {
        for nh in nh_keys {
            let member = match group.members.get_mut(nh) {
                Some(m) => m,
                None => continue,
            };
            if !member.is_synced() {
                continue;
            }
            self.asic
                .remove_group_member(member.member_id)
                .map_err(|e| TaskError::driver("remove_group_member", e.to_string()))?;
            member.member_id = switchd_asic::NhGroupMemberOid::NULL;
            self.neighbors.lock().unwrap().decrease_ref(nh);
        }
        Ok(())
    }

    fn remove_group(&mut self, group: &mut NextHopGroup) -> Result<(), TaskError> {
        if !group.is_synced() {
            return Ok(());
        }
        if let Some(group_oid) = group.id.group_oid() {
            let keys: Vec<NextHopKey> = group.members.keys().cloned().collect();
            self.remove_members(group, &keys)?;
            self.asic
                .remove_next_hop_group(group_oid)
                .map_err(|e| TaskError::driver("remove_next_hop_group", e.to_string()))?;
            self.synced_group_count = self.synced_group_count.saturating_sub(1);
        }
        group.id = GroupId::Unsynced;
        Ok(())
    }

    /// Updates a group to a new key. Multi-member to multi-member updates
    /// keep the driver id: dropped members go first (freeing room), weights
    /// are refreshed, then new members are added. Everything else swaps the
    /// group wholesale.
    fn update_group(
        &mut self,
        group: &mut NextHopGroup,
        nhg_key: NextHopGroupKey,
    ) -> Result<(), TaskError> {
        if nhg_key.len() == 1 || group.size() == 1 || !group.is_synced() {
            let was_synced = group.is_synced();
            self.remove_group(group)?;
            *group = NextHopGroup::new(nhg_key);
            if was_synced {
                self.sync_group(group)?;
            }
            return Ok(());
        }

        group.key = nhg_key.clone();

        let mut removed: Vec<NextHopKey> = Vec::new();
        let mut weight_updates: Vec<(NextHopKey, u32)> = Vec::new();
        for (nh, member) in &group.members {
            match nhg_key.weight_of(nh) {
                None => removed.push(nh.clone()),
                Some(weight) if weight != member.weight => {
                    weight_updates.push((nh.clone(), weight));
                }
                Some(_) => {}
            }
        }

        self.remove_members(group, &removed)?;
        for nh in &removed {
            group.members.remove(nh);
        }

        for (nh, weight) in weight_updates {
            if let Some(member) = group.members.get_mut(&nh) {
                member.weight = weight;
                if member.is_synced() {
                    self.asic
                        .set_member_weight(member.member_id, weight)
                        .map_err(|e| TaskError::driver("set_member_weight", e.to_string()))?;
                }
            }
        }

        for (nh, weight) in nhg_key.iter() {
            if !group.members.contains_key(nh) {
                group
                    .members
                    .insert(nh.clone(), NhgMember::new(nh.clone(), weight));
            }
        }

        // Sync the whole member set: previous attempts may have left
        // unsynced members behind.
        let keys: Vec<NextHopKey> = group.members.keys().cloned().collect();
        self.sync_members(group, &keys)
    }

    /// Picks one resolved member uniformly at random to stand in for the
    /// whole group.
    fn create_temp_group(&self, nhg_key: &NextHopGroupKey) -> Result<NextHopGroup, TaskError> {
        let valid: Vec<NextHopKey> = {
            let neighbors = self.neighbors.lock().unwrap();
            nhg_key
                .next_hops()
                .filter(|nh| neighbors.is_neighbor_resolved(nh))
                .cloned()
                .collect()
        };
        if valid.is_empty() {
            return Err(TaskError::precondition("any resolved member"));
        }
        let pick = valid[rand::thread_rng().gen_range(0..valid.len())].clone();
        Ok(NextHopGroup::temp(NextHopGroupKey::single(pick)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::STATE_SWITCH_CAPABILITY_TABLE;
    use pretty_assertions::assert_eq;
    use switchd_asic::{MockAsic, NextHopOid, RecordedOp};
    use switchd_orch_common::MemStore;

    fn nh(s: &str) -> NextHopKey {
        s.parse().unwrap()
    }

    async fn orch_with(max_groups: u32, resolved: &[(&str, u64)]) -> (NhgOrch, Arc<MockAsic>, MemStore) {
        let store = MemStore::new();
        let asic = Arc::new(MockAsic::new().with_max_ecmp_groups(max_groups));
        let neighbors = Arc::new(Mutex::new(NeighborTable::new()));
        for (key, oid) in resolved {
            neighbors
                .lock()
                .unwrap()
                .resolve(nh(key), NextHopOid::from_raw(*oid));
        }
        let orch = NhgOrch::new(&store, asic.clone(), neighbors).await;
        (orch, asic, store)
    }

    fn set_entry(index: &str, ips: &str, ifnames: &str) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(
            index,
            vec![
                ("nexthop".to_string(), ips.to_string()),
                ("ifname".to_string(), ifnames.to_string()),
            ],
        )
    }

    #[tokio::test]
    async fn capacity_is_published_and_scaled() {
        let (_, _, store) = orch_with(256, &[]).await;
        assert_eq!(
            store.field(STATE_SWITCH_CAPABILITY_TABLE, "switch", "MAX_NEXTHOP_GROUP_COUNT"),
            Some("256".to_string())
        );

        let store = MemStore::new();
        let asic = Arc::new(
            MockAsic::new()
                .with_max_ecmp_groups(25600)
                .with_platform(Platform::MellanoxLike),
        );
        let neighbors = Arc::new(Mutex::new(NeighborTable::new()));
        let orch = NhgOrch::new(&store, asic, neighbors).await;
        assert_eq!(orch.max_group_count, 25600 / DEFAULT_MAX_ECMP_GROUP_SIZE);
    }

    #[tokio::test]
    async fn single_member_group_aliases_next_hop() {
        let (mut orch, asic, _) = orch_with(8, &[("10.0.0.1@e0", 0x31)]).await;
        let outcome = orch.apply(&set_entry("g1", "10.0.0.1", "e0"));
        assert_eq!(outcome, ApplyOutcome::Done);
        assert_eq!(orch.group_driver_id("g1"), Some(0x31));
        // No driver group object for single members.
        assert_eq!(asic.live_group_count(), 0);
        assert_eq!(orch.group_count(), 0);
    }

    #[tokio::test]
    async fn multi_member_group_creates_driver_object() {
        let (mut orch, asic, _) =
            orch_with(8, &[("10.0.0.1@e0", 0x31), ("10.0.0.2@e1", 0x32)]).await;
        let outcome = orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        assert_eq!(outcome, ApplyOutcome::Done);
        assert_eq!(asic.live_group_count(), 1);
        assert_eq!(orch.group_count(), 1);
        assert!(orch.group_driver_id("g1").is_some());
    }

    #[tokio::test]
    async fn unresolved_members_defer_the_group() {
        let (mut orch, _, _) = orch_with(8, &[("10.0.0.1@e0", 0x31)]).await;
        let outcome = orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        assert_eq!(outcome, ApplyOutcome::Retry);
        assert!(!orch.has_group("g1"));
    }

    /// Capacity exhaustion: the group materialises as a temporary
    /// single-member alias and is promoted when room frees up.
    #[tokio::test]
    async fn temporary_group_promotion() {
        let (mut orch, _, _) = orch_with(
            1,
            &[
                ("10.0.0.1@e0", 0x31),
                ("10.0.0.2@e1", 0x32),
                ("10.0.1.1@e2", 0x33),
                ("10.0.1.2@e3", 0x34),
            ],
        )
        .await;

        assert_eq!(
            orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1")),
            ApplyOutcome::Done
        );
        assert_eq!(orch.group_count(), 1);

        // Table is full: the second group becomes a temporary alias and the
        // entry keeps retrying.
        assert_eq!(
            orch.apply(&set_entry("g2", "10.0.1.1,10.0.1.2", "e2,e3")),
            ApplyOutcome::Retry
        );
        assert!(orch.is_temp("g2"));
        let temp_id = orch.group_driver_id("g2").unwrap();
        assert!(temp_id == 0x33 || temp_id == 0x34);

        orch.increment_ref("g2");
        assert_eq!(orch.ref_count("g2"), 1);

        // Free the first group, then retry the second: promotion to a real
        // multi-member group with a fresh driver id.
        assert_eq!(orch.apply(&KeyOpFieldsValues::del("g1")), ApplyOutcome::Done);
        assert_eq!(orch.group_count(), 0);

        assert_eq!(
            orch.apply(&set_entry("g2", "10.0.1.1,10.0.1.2", "e2,e3")),
            ApplyOutcome::Done
        );
        assert!(!orch.is_temp("g2"));
        assert_eq!(orch.group_count(), 1);
        let promoted = orch.group_driver_id("g2").unwrap();
        assert_ne!(promoted, temp_id);
        // The reference taken on the temporary group survives promotion.
        assert_eq!(orch.ref_count("g2"), 1);
    }

    /// A multi-member update that stays multi-member never changes the
    /// driver id, even across member and weight churn.
    #[tokio::test]
    async fn update_preserves_driver_id() {
        let (mut orch, asic, _) = orch_with(
            8,
            &[
                ("10.0.0.1@e0", 0x31),
                ("10.0.0.2@e1", 0x32),
                ("10.0.0.3@e2", 0x33),
            ],
        )
        .await;

        orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        orch.increment_ref("g1");
        let id = orch.group_driver_id("g1").unwrap();

        asic.clear_ops();
        assert_eq!(
            orch.apply(&set_entry("g1", "10.0.0.2,10.0.0.3", "e1,e2")),
            ApplyOutcome::Done
        );
        assert_eq!(orch.group_driver_id("g1"), Some(id));

        // Dropped members removed before new ones are added.
        let ops = asic.ops();
        let remove_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedOp::RemoveMember { .. }))
            .unwrap();
        let add_pos = ops
            .iter()
            .position(|op| matches!(op, RecordedOp::CreateMember { .. }))
            .unwrap();
        assert!(remove_pos < add_pos);
    }

    #[tokio::test]
    async fn referenced_group_rejects_id_changing_update() {
        let (mut orch, _, _) =
            orch_with(8, &[("10.0.0.1@e0", 0x31), ("10.0.0.2@e1", 0x32)]).await;
        orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        orch.increment_ref("g1");
        let id = orch.group_driver_id("g1").unwrap();

        // Shrinking to one member would change the id: refused while
        // referenced.
        assert_eq!(
            orch.apply(&set_entry("g1", "10.0.0.1", "e0")),
            ApplyOutcome::Retry
        );
        assert_eq!(orch.group_driver_id("g1"), Some(id));

        // Once the reference drains the update goes through.
        orch.decrement_ref("g1");
        assert_eq!(
            orch.apply(&set_entry("g1", "10.0.0.1", "e0")),
            ApplyOutcome::Done
        );
        assert_eq!(orch.group_driver_id("g1"), Some(0x31));
    }

    #[tokio::test]
    async fn weight_update_in_place() {
        let (mut orch, asic, _) =
            orch_with(8, &[("10.0.0.1@e0", 0x31), ("10.0.0.2@e1", 0x32)]).await;
        orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        let id = orch.group_driver_id("g1").unwrap();
        asic.clear_ops();

        let update = KeyOpFieldsValues::set(
            "g1",
            vec![
                ("nexthop".to_string(), "10.0.0.1,10.0.0.2".to_string()),
                ("ifname".to_string(), "e0,e1".to_string()),
                ("weight".to_string(), "3,1".to_string()),
            ],
        );
        assert_eq!(orch.apply(&update), ApplyOutcome::Done);
        assert_eq!(orch.group_driver_id("g1"), Some(id));
        assert!(asic
            .ops()
            .iter()
            .any(|op| matches!(op, RecordedOp::SetMemberWeight { weight: 3, .. })));
    }

    #[tokio::test]
    async fn invalidate_and_validate_member() {
        let (mut orch, asic, _) =
            orch_with(8, &[("10.0.0.1@e0", 0x31), ("10.0.0.2@e1", 0x32)]).await;
        orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        asic.clear_ops();

        orch.invalidate_next_hop(&nh("10.0.0.1@e0")).unwrap();
        assert!(asic
            .ops()
            .iter()
            .any(|op| matches!(op, RecordedOp::RemoveMember { .. })));

        orch.validate_next_hop(&nh("10.0.0.1@e0")).unwrap();
        assert!(asic
            .ops()
            .iter()
            .any(|op| matches!(op, RecordedOp::CreateMember { .. })));
    }

    #[tokio::test]
    async fn delete_refused_while_referenced() {
        let (mut orch, _, _) =
            orch_with(8, &[("10.0.0.1@e0", 0x31), ("10.0.0.2@e1", 0x32)]).await;
        orch.apply(&set_entry("g1", "10.0.0.1,10.0.0.2", "e0,e1"));
        orch.increment_ref("g1");
        assert_eq!(orch.apply(&KeyOpFieldsValues::del("g1")), ApplyOutcome::Retry);
        orch.decrement_ref("g1");
        assert_eq!(orch.apply(&KeyOpFieldsValues::del("g1")), ApplyOutcome::Done);
        assert!(!orch.has_group("g1"));
    }
}
