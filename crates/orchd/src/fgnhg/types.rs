//! Data model of fine-grained groups and their synced routes.

use crate::nexthop::{NextHopGroupKey, NextHopKey};
use std::collections::{HashMap, HashSet};
use switchd_asic::{NhGroupMemberOid, NhGroupOid};
use switchd_types::{IpAddress, IpPrefix};

/// How routes are matched to a fine-grained group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FgMatchMode {
    /// Prefixes listed in `FG_NHG_PREFIX` use the group.
    #[default]
    RouteBased,
    /// Any route whose next hops are all members uses the group.
    NexthopBased,
}

/// Contiguous bucket index range owned by one bank, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankRange {
    pub start: u32,
    pub end: u32,
}

impl BankRange {
    pub fn size(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// Per-member configuration and tracked link state.
#[derive(Debug, Clone, Default)]
pub struct FgNextHopInfo {
    pub bank: u32,
    /// Tracked port; link transitions drive membership when set.
    pub link: Option<String>,
    pub link_up: bool,
}

/// A configured fine-grained group.
#[derive(Debug, Clone, Default)]
pub struct FgNhgEntry {
    pub name: String,
    pub configured_bucket_size: u32,
    /// Driver-assigned table size, set once at group create.
    pub real_bucket_size: u32,
    pub match_mode: FgMatchMode,
    pub next_hops: HashMap<IpAddress, FgNextHopInfo>,
    /// Tracked link -> member ips bound to it.
    pub links: HashMap<String, Vec<IpAddress>>,
    pub bank_ranges: Vec<BankRange>,
    pub prefixes: Vec<IpPrefix>,
}

impl FgNhgEntry {
    pub fn new(name: impl Into<String>, configured_bucket_size: u32, match_mode: FgMatchMode) -> Self {
        Self {
            name: name.into(),
            configured_bucket_size,
            match_mode,
            ..Self::default()
        }
    }

    /// Number of banks implied by the configured members.
    pub fn bank_count(&self) -> usize {
        self.next_hops
            .values()
            .map(|info| info.bank as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Splits `[0, real_bucket_size)` into per-bank ranges, sized
    /// proportionally to bank membership. The division remainder is spread
    /// by first splitting it evenly across banks and then rotating the rest
    /// +1 from the first bank on.
    pub fn calculate_bank_ranges(&mut self) {
        let num_banks = self.bank_count();
        if num_banks == 0 || self.next_hops.is_empty() {
            self.bank_ranges.clear();
            return;
        }
        let mut members_per_bank = vec![0u32; num_banks];
        for info in self.next_hops.values() {
            members_per_bank[info.bank as usize] += 1;
        }

        let total_members = self.next_hops.len() as u32;
        let buckets_per_member = self.real_bucket_size / total_members;
        let mut extra = self.real_bucket_size - buckets_per_member * total_members;
        let split_across_banks = extra / num_banks as u32;
        extra -= split_across_banks * num_banks as u32;

        self.bank_ranges.clear();
        let mut prev = 0u32;
        for members in members_per_bank {
            let mut end = prev + buckets_per_member * members + split_across_banks - 1;
            if extra > 0 {
                end += 1;
                extra -= 1;
            }
            self.bank_ranges.push(BankRange { start: prev, end });
            prev = end + 1;
        }
    }
}

/// A route bound to a fine-grained group, as programmed in the driver.
#[derive(Debug, Clone, Default)]
pub struct FgRouteEntry {
    pub group_id: NhGroupOid,
    /// Driver member id per bucket index.
    pub members: Vec<NhGroupMemberOid>,
    pub nhg_key: NextHopGroupKey,
    pub active_nexthops: HashSet<NextHopKey>,
    /// Per bank: member -> bucket indices it currently holds.
    pub bank_maps: Vec<HashMap<NextHopKey, Vec<u32>>>,
    /// Bank -> bank whose members fill its buckets; identity when active.
    pub inactive_to_active: HashMap<u32, u32>,
}

/// Membership delta of one bank, computed per apply.
#[derive(Debug, Clone, Default)]
pub struct BankMemberChanges {
    pub active_nhs: Vec<NextHopKey>,
    pub nhs_to_add: Vec<NextHopKey>,
    pub nhs_to_del: Vec<NextHopKey>,
}

impl BankMemberChanges {
    /// A bank stays (or becomes) active when it has live members, or when
    /// simultaneous adds replace every deleted member.
    pub fn is_active(&self) -> bool {
        !self.active_nhs.is_empty()
            || (!self.nhs_to_add.is_empty() && !self.nhs_to_del.is_empty())
    }
}
