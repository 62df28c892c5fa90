//! Placement views and the rebuild-target oracle.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use scour_types::{MapVersion, ObjectId, PoolId, PoolMap, RebuildVersion, TargetId, TargetState};
use tracing::{debug, info};

use crate::{PlacementError, Ring};

type Result<T> = std::result::Result<T, PlacementError>;

/// Default number of vnodes per target.
pub const DEFAULT_VNODES_PER_TARGET: u16 = 64;

/// The targets whose failure triggered one rebuild version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTargetGroup {
    /// Rebuild version the group belongs to.
    pub version: RebuildVersion,
    /// Failed targets.
    pub targets: Vec<TargetId>,
}

impl FailedTargetGroup {
    /// Create a group.
    pub fn new(version: RebuildVersion, targets: Vec<TargetId>) -> Self {
        Self { version, targets }
    }

    /// Whether `target` is part of the group.
    pub fn contains(&self, target: TargetId) -> bool {
        self.targets.contains(&target)
    }

    /// Number of failed targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Outcome of evaluating one object against a failed-target group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildDecision {
    /// None of the object's shards live on a failed target, or there is
    /// nowhere to rebuild to.
    NotNeeded,
    /// Shard `shard` must be rebuilt on `target`.
    Rebuild {
        /// Spare target that takes over the shard.
        target: TargetId,
        /// Shard index within the object's layout.
        shard: u32,
    },
}

/// A placement view derived from one version of the pool map.
///
/// The ring holds every target regardless of state, so layouts stay stable
/// while targets fail; states only matter when choosing a spare.
#[derive(Debug, Clone)]
pub struct PlacementMap {
    version: MapVersion,
    ring: Ring,
    states: BTreeMap<TargetId, TargetState>,
}

impl PlacementMap {
    /// Build a view of `pool_map`.
    pub fn build(pool_map: &PoolMap, vnodes_per_target: u16) -> Self {
        let mut ring = Ring::new(vnodes_per_target);
        for (target, _) in pool_map.targets() {
            ring.add_target(target);
        }
        Self {
            version: pool_map.version(),
            ring,
            states: pool_map.targets().collect(),
        }
    }

    /// Pool map version this view was built from.
    pub fn version(&self) -> MapVersion {
        self.version
    }

    /// Targets holding each shard of `oid`, shard 0 first.
    pub fn layout(&self, oid: &ObjectId) -> Vec<TargetId> {
        self.ring.layout(oid, oid.shard_count() as usize)
    }

    /// Decide whether `oid` has a shard on a failed target and where it goes.
    ///
    /// Only the first affected shard is reported. The spare is the next
    /// target on the object's walk that is not in the layout, not in the
    /// failed group, and not down.
    pub fn find_rebuild(&self, oid: &ObjectId, group: &FailedTargetGroup) -> RebuildDecision {
        let layout = self.layout(oid);
        let Some(shard) = layout.iter().position(|target| group.contains(*target)) else {
            return RebuildDecision::NotNeeded;
        };

        let spare = self.ring.spare_after(oid, |candidate| {
            layout.contains(&candidate)
                || group.contains(candidate)
                || self
                    .states
                    .get(&candidate)
                    .is_none_or(|state| state.is_down())
        });

        match spare {
            Some(target) => RebuildDecision::Rebuild {
                target,
                shard: shard as u32,
            },
            None => {
                debug!(%oid, shard, "no spare target available");
                RebuildDecision::NotNeeded
            }
        }
    }
}

/// Answers "does this object need rebuild, and where to".
pub trait PlacementOracle: Send + Sync {
    /// Evaluate `oid` against `group` using a view at least as new as
    /// `pool_map_version`.
    ///
    /// Returns [`PlacementError::Stale`] when the cached view is older; the
    /// caller refreshes and asks again.
    fn find_rebuild_target(
        &self,
        pool: PoolId,
        oid: &ObjectId,
        pool_map_version: MapVersion,
        group: &FailedTargetGroup,
    ) -> Result<RebuildDecision>;

    /// Bring the pool's view up to `pool_map`. Idempotent; an older or equal
    /// map never replaces a newer view. Returns the resulting view version.
    fn refresh(&self, pool: PoolId, pool_map: &PoolMap) -> Result<MapVersion>;

    /// Drop the pool's cached view.
    fn disconnect(&self, pool: PoolId);

    /// Version of the pool's cached view, if any.
    fn view_version(&self, pool: PoolId) -> Option<MapVersion>;
}

/// [`PlacementOracle`] backed by a consistent-hash ring per pool.
#[derive(Debug)]
pub struct RingOracle {
    vnodes_per_target: u16,
    views: RwLock<HashMap<PoolId, Arc<PlacementMap>>>,
}

impl RingOracle {
    /// Create an oracle with no cached views.
    pub fn new(vnodes_per_target: u16) -> Self {
        Self {
            vnodes_per_target,
            views: RwLock::new(HashMap::new()),
        }
    }

    /// The pool's current view.
    pub fn view(&self, pool: PoolId) -> Option<Arc<PlacementMap>> {
        self.views
            .read()
            .expect("placement views lock poisoned")
            .get(&pool)
            .cloned()
    }
}

impl Default for RingOracle {
    fn default() -> Self {
        Self::new(DEFAULT_VNODES_PER_TARGET)
    }
}

impl PlacementOracle for RingOracle {
    fn find_rebuild_target(
        &self,
        pool: PoolId,
        oid: &ObjectId,
        pool_map_version: MapVersion,
        group: &FailedTargetGroup,
    ) -> Result<RebuildDecision> {
        let view = self
            .view(pool)
            .ok_or(PlacementError::NoPlacementMap(pool))?;
        if view.version() < pool_map_version {
            return Err(PlacementError::Stale {
                cached: view.version(),
                required: pool_map_version,
            });
        }
        Ok(view.find_rebuild(oid, group))
    }

    fn refresh(&self, pool: PoolId, pool_map: &PoolMap) -> Result<MapVersion> {
        if let Some(current) = self.view_version(pool)
            && current >= pool_map.version()
        {
            return Ok(current);
        }
        if pool_map.is_empty() {
            return Err(PlacementError::RefreshFailed(format!(
                "pool map v{} has no targets",
                pool_map.version()
            )));
        }

        // Build outside the lock; a concurrent refresh may have won meanwhile.
        let built = Arc::new(PlacementMap::build(pool_map, self.vnodes_per_target));
        let mut views = self.views.write().expect("placement views lock poisoned");
        let view = views
            .entry(pool)
            .and_modify(|view| {
                if view.version() < built.version() {
                    *view = built.clone();
                }
            })
            .or_insert_with(|| built.clone());
        info!(%pool, version = view.version(), "placement view refreshed");
        Ok(view.version())
    }

    fn disconnect(&self, pool: PoolId) {
        if self
            .views
            .write()
            .expect("placement views lock poisoned")
            .remove(&pool)
            .is_some()
        {
            debug!(%pool, "placement view dropped");
        }
    }

    fn view_version(&self, pool: PoolId) -> Option<MapVersion> {
        self.view(pool).map(|view| view.version())
    }
}
