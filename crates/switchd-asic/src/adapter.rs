//! The narrow driver programming surface the orchestrators call.

use crate::error::AsicResult;
use crate::types::{NextHopOid, NhGroupMemberOid, NhGroupOid};

/// Default maximum members of an ECMP group; Mellanox-like platforms report
/// group capacity for size-1 groups and need the count divided by this.
pub const DEFAULT_MAX_ECMP_GROUP_SIZE: u32 = 128;

/// Platform family quirks the orchestrators must honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Generic,
    /// Capacity numbers are per-size-1-group and must be scaled down.
    MellanoxLike,
    /// Virtual switch: no real-size query; configured size is the real size.
    Virtual,
}

/// Kind of next-hop group object to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NhGroupKind {
    Ecmp,
    /// Fixed-size hash-bucket table with per-bucket members.
    FineGrainEcmp { configured_size: u32 },
}

/// The only trait allowed to speak the device SDK's vocabulary.
///
/// Calls are synchronous short operations; callers treat a failure as a
/// transient driver error unless it is a capacity report.
pub trait AsicAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Driver-reported maximum number of ECMP groups, unscaled.
    fn max_ecmp_groups(&self) -> u32;

    fn create_next_hop_group(&self, kind: NhGroupKind) -> AsicResult<NhGroupOid>;

    fn remove_next_hop_group(&self, group: NhGroupOid) -> AsicResult<()>;

    /// Driver-assigned bucket count of a fine-grain group. Not available on
    /// [`Platform::Virtual`].
    fn real_bucket_size(&self, group: NhGroupOid) -> AsicResult<u32>;

    /// Creates a member; `index` is set for fine-grain bucket slots.
    fn create_group_member(
        &self,
        group: NhGroupOid,
        next_hop: NextHopOid,
        index: Option<u32>,
        weight: Option<u32>,
    ) -> AsicResult<NhGroupMemberOid>;

    fn remove_group_member(&self, member: NhGroupMemberOid) -> AsicResult<()>;

    /// Points a member slot at a different next hop (the bucket write).
    fn set_member_next_hop(
        &self,
        member: NhGroupMemberOid,
        next_hop: NextHopOid,
    ) -> AsicResult<()>;

    fn set_member_weight(&self, member: NhGroupMemberOid, weight: u32) -> AsicResult<()>;
}
