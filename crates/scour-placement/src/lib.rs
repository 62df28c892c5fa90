//! Placement for the rebuild pipeline.
//!
//! This crate answers the question the rebuild scanner asks for every local
//! object: "given this pool map version and these failed targets, does one
//! of the object's shards need to move, and to which target?"
//!
//! - [`Ring`]: consistent-hash ring of targets. Each target gets multiple
//!   positions on the ring, determined by `blake3(rank ++ vnode_index)`.
//! - [`PlacementMap`]: a versioned view built from a [`PoolMap`](scour_types::PoolMap).
//! - [`PlacementOracle`] / [`RingOracle`]: cached per-pool views with
//!   versioned, idempotent refresh.
//! - [`PoolMapSource`] / [`SharedPoolMap`]: the latest pool map and change
//!   notification.

mod error;
mod oracle;
mod pool;
mod ring;

pub use error::PlacementError;
pub use oracle::{
    DEFAULT_VNODES_PER_TARGET, FailedTargetGroup, PlacementMap, PlacementOracle, RebuildDecision,
    RingOracle,
};
pub use pool::{PoolMapSource, SharedPoolMap};
pub use ring::Ring;
