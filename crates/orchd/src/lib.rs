//! The switch orchestration daemon.
//!
//! `orchd` turns app-store routing intent into driver programming requests.
//! Two orchestrators carry the interesting state machines:
//!
//! - [`nhg::NhgOrch`]: multi-member next-hop groups with capacity-aware
//!   temporary groups and reference-count-safe updates.
//! - [`fgnhg::FgNhgOrch`]: fine-grained ECMP, where a route's next hops are
//!   spread over a fixed-size hash-bucket table and membership changes move
//!   as few buckets as possible.
//!
//! Cross-orchestrator collaboration goes through the [`daemon::Directory`]:
//! shared neighbor state, typed event channels and the synced-route view.

pub mod daemon;
pub mod fgnhg;
pub mod neighbor;
pub mod nexthop;
pub mod nhg;
pub mod tables;
