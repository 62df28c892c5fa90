//! Consistent hashing ring over storage targets.

use std::collections::{BTreeMap, HashMap};

use scour_types::{ObjectId, TargetId};
use tracing::debug;

/// Consistent hashing ring for deterministic object layout.
///
/// Each target is mapped to multiple virtual nodes (vnodes) on a u64 ring.
/// An object's layout is found by walking clockwise from the object's
/// position until enough distinct targets are collected.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Virtual node positions: ring position -> target.
    vnodes: BTreeMap<u64, TargetId>,
    /// Target -> number of vnodes it owns.
    weights: HashMap<TargetId, u16>,
    /// Default number of vnodes per target.
    vnodes_per_target: u16,
}

impl Ring {
    /// Create a new empty ring.
    pub fn new(vnodes_per_target: u16) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            weights: HashMap::new(),
            vnodes_per_target,
        }
    }

    /// Add a target with the default vnode count.
    pub fn add_target(&mut self, target: TargetId) {
        self.add_target_with_weight(target, self.vnodes_per_target);
    }

    /// Add a target with an explicit number of vnodes.
    pub fn add_target_with_weight(&mut self, target: TargetId, weight: u16) {
        // Re-adding replaces the previous weight.
        self.remove_target(target);

        for i in 0..weight {
            self.vnodes.insert(vnode_position(target, i), target);
        }
        self.weights.insert(target, weight);
        debug!(%target, weight, "added target to ring");
    }

    /// Remove a target from the ring.
    pub fn remove_target(&mut self, target: TargetId) {
        if let Some(weight) = self.weights.remove(&target) {
            for i in 0..weight {
                self.vnodes.remove(&vnode_position(target, i));
            }
            debug!(%target, "removed target from ring");
        }
    }

    /// Targets holding an object's shards, shard 0 first.
    ///
    /// Returns fewer than `width` targets when the ring is smaller than that.
    pub fn layout(&self, oid: &ObjectId, width: usize) -> Vec<TargetId> {
        self.walk(oid).take(width).collect()
    }

    /// First target on the object's walk for which `exclude` returns false.
    ///
    /// Walks the whole ring once, so every target is considered.
    pub fn spare_after(
        &self,
        oid: &ObjectId,
        exclude: impl Fn(TargetId) -> bool,
    ) -> Option<TargetId> {
        self.walk(oid).find(|target| !exclude(*target))
    }

    /// Distinct targets in clockwise order from the object's position.
    fn walk(&self, oid: &ObjectId) -> impl Iterator<Item = TargetId> + '_ {
        let pos = object_position(oid);
        let mut seen = Vec::with_capacity(self.weights.len());
        self.vnodes
            .range(pos..)
            .chain(self.vnodes.range(..pos))
            .map(|(_, target)| *target)
            .filter(move |target| {
                if seen.contains(target) {
                    false
                } else {
                    seen.push(*target);
                    true
                }
            })
    }

    /// Whether `target` is on the ring.
    pub fn contains(&self, target: TargetId) -> bool {
        self.weights.contains_key(&target)
    }

    /// Number of targets in the ring.
    pub fn target_count(&self) -> usize {
        self.weights.len()
    }

    /// Total number of vnodes in the ring.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }
}

/// blake3(rank ++ vnode_index) truncated to u64.
fn vnode_position(target: TargetId, vnode_index: u16) -> u64 {
    let mut input = [0u8; 6];
    input[..4].copy_from_slice(&target.rank().to_le_bytes());
    input[4..].copy_from_slice(&vnode_index.to_le_bytes());
    truncate(blake3::hash(&input))
}

/// blake3 of the object id truncated to u64.
fn object_position(oid: &ObjectId) -> u64 {
    truncate(blake3::hash(&oid.to_bytes()))
}

fn truncate(hash: blake3::Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
