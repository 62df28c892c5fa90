//! Shared types and identifiers for scour.
//!
//! This crate defines the core types used across the scour workspace:
//! identifiers ([`TargetId`], [`PoolId`], [`ContainerId`], [`ObjectId`]),
//! the queue key and fact types ([`ShardKey`], [`RebuildFact`]),
//! and the versioned pool map ([`PoolMap`], [`TargetState`]).

pub mod events;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic counter identifying one rebuild episode.
pub type RebuildVersion = u32;

/// Version of a pool map or of a placement view derived from one.
pub type MapVersion = u32;

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Build an identifier from its raw 16 bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Return the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<u128> for $name {
            fn from(value: u128) -> Self {
                Self(Uuid::from_u128(value))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_uuid_id!(
    /// Identifier of a storage pool.
    PoolId
);

define_uuid_id!(
    /// Identifier of a container, the tenant-like grouping of objects.
    ContainerId
);

/// Rank of a storage target within a pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TargetId(u32);

impl TargetId {
    /// Create a target ID from its rank.
    pub const fn new(rank: u32) -> Self {
        Self(rank)
    }

    /// Return the numeric rank.
    pub const fn rank(self) -> u32 {
        self.0
    }
}

impl From<u32> for TargetId {
    fn from(rank: u32) -> Self {
        Self(rank)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

/// Bit offset of the shard-count field inside [`ObjectId::hi`].
const SHARD_COUNT_SHIFT: u32 = 56;

/// Identifier of an object within a container.
///
/// The top 8 bits of `hi` encode the object's redundancy width (how many
/// shards its layout spans). The remaining bits are opaque.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectId {
    /// High word, carrying the shard-count field.
    pub hi: u64,
    /// Low word.
    pub lo: u64,
}

impl ObjectId {
    /// Create an object ID from raw words.
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    /// Create an object ID whose layout spans `shards` targets.
    pub const fn with_shards(shards: u8, seq: u64) -> Self {
        Self {
            hi: (shards as u64) << SHARD_COUNT_SHIFT,
            lo: seq,
        }
    }

    /// Number of shards in this object's layout (at least 1).
    pub fn shard_count(&self) -> u32 {
        ((self.hi >> SHARD_COUNT_SHIFT) as u32).max(1)
    }

    /// Big-endian byte representation (`hi` then `lo`).
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.hi.to_be_bytes());
        out[8..].copy_from_slice(&self.lo.to_be_bytes());
        out
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}", self.hi, self.lo)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

// ---------------------------------------------------------------------------
// Rebuild facts
// ---------------------------------------------------------------------------

/// Key of a single object shard inside a container's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ShardKey {
    /// The object.
    pub oid: ObjectId,
    /// Shard number within the object's layout.
    pub shard: u32,
}

impl ShardKey {
    /// Create a new shard key.
    pub const fn new(oid: ObjectId, shard: u32) -> Self {
        Self { oid, shard }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.oid, self.shard)
    }
}

/// "Shard `shard_number` of `object_id` must move to `destination_target`."
///
/// Produced by the scanner, consumed by ship queue insertion, and emitted
/// again by draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RebuildFact {
    /// Object to rebuild.
    pub object_id: ObjectId,
    /// Shard of the object that lives on the failed target.
    pub shard_number: u32,
    /// Container the object belongs to on the destination.
    pub container_id: ContainerId,
    /// Target that should pull and rebuild the shard.
    pub destination_target: TargetId,
    /// Container the object was discovered in locally.
    pub source_container: ContainerId,
}

impl RebuildFact {
    /// The queue key for this fact.
    pub fn key(&self) -> ShardKey {
        ShardKey::new(self.object_id, self.shard_number)
    }
}

// ---------------------------------------------------------------------------
// Pool map
// ---------------------------------------------------------------------------

/// State of a target inside the pool map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetState {
    /// Healthy and serving.
    Up,
    /// Healthy and fully integrated (rebuild finished).
    UpIn,
    /// Failed, still referenced by layouts.
    Down,
    /// Failed and excluded from the pool.
    DownOut,
    /// Added but not yet integrated.
    New,
}

impl TargetState {
    /// Whether the target is unusable as a destination.
    pub fn is_down(self) -> bool {
        matches!(self, Self::Down | Self::DownOut)
    }
}

/// Versioned view of every target in a pool and its state.
///
/// Pool map maintenance lives elsewhere; this is the value type rebuild
/// reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMap {
    version: MapVersion,
    targets: BTreeMap<TargetId, TargetState>,
}

impl PoolMap {
    /// Create a pool map at `version` with the given targets.
    pub fn new(
        version: MapVersion,
        targets: impl IntoIterator<Item = (TargetId, TargetState)>,
    ) -> Self {
        Self {
            version,
            targets: targets.into_iter().collect(),
        }
    }

    /// Map version.
    pub fn version(&self) -> MapVersion {
        self.version
    }

    /// Number of targets in the map.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the map has no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// State of `rank`, or `None` if the map has no such target.
    pub fn find_target(&self, rank: TargetId) -> Option<TargetState> {
        self.targets.get(&rank).copied()
    }

    /// Whether `rank` is absent from the map or marked down.
    pub fn is_down_or_absent(&self, rank: TargetId) -> bool {
        self.find_target(rank).is_none_or(TargetState::is_down)
    }

    /// All targets currently marked down, in rank order.
    pub fn down_targets(&self) -> Vec<TargetId> {
        self.targets
            .iter()
            .filter(|(_, state)| state.is_down())
            .map(|(rank, _)| *rank)
            .collect()
    }

    /// Iterate over `(rank, state)` pairs in rank order.
    pub fn targets(&self) -> impl Iterator<Item = (TargetId, TargetState)> + '_ {
        self.targets.iter().map(|(rank, state)| (*rank, *state))
    }

    /// Return a copy of this map, one version newer, with `rank` set to `state`.
    pub fn with_target_state(&self, rank: TargetId, state: TargetState) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.targets.insert(rank, state);
        next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
