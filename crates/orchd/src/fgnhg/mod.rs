//! Fine-grained ECMP orchestration.
//!
//! A fine-grained group pins a route's per-flow next-hop selection to a
//! fixed-size hash-bucket table. Members are partitioned into banks, each
//! bank owns a contiguous bucket range, and membership changes reassign
//! individual buckets instead of re-hashing the table.

mod orch;
mod types;

pub use orch::{FgNhgOrch, SyncedRouteView};
pub use types::{
    BankMemberChanges, BankRange, FgMatchMode, FgNextHopInfo, FgNhgEntry, FgRouteEntry,
};
