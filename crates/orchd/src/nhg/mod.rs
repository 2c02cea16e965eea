//! Next-hop group orchestration.
//!
//! Groups are keyed by an app-store index and hold an ordered member set.
//! Single-member groups alias the member's driver next-hop id; multi-member
//! groups own a driver group object whose id stays stable across updates
//! while anything references it. When the driver's group table is full, a
//! temporary single-member stand-in keeps traffic flowing until capacity
//! frees up.

mod orch;
mod types;

pub use orch::NhgOrch;
pub use types::{GroupId, NextHopGroup, NhgMember};
