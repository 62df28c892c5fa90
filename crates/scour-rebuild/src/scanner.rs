//! Scanner: evaluates local objects against the failed-target group and
//! fills the ship queue.
//!
//! One [`Scanner`] runs per local execution context. [`scan_collective`]
//! fans them out on a [`JoinSet`] and joins them all before returning.
//! Scanners never touch the network.

use std::sync::Arc;

use scour_placement::{
    FailedTargetGroup, PlacementError, PlacementOracle, PoolMapSource, RebuildDecision,
};
use scour_types::{ObjectId, PoolId, TargetId};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::RebuildError;
use crate::fault::{FailPoint, FaultInjector};
use crate::queue::{InsertOutcome, ShipQueue};
use crate::source::{LocalObject, ObjectSource};
use crate::tracker::RebuildTracker;

/// State shared by every scanner of one rebuild.
pub struct ScanShared {
    /// Pool being rebuilt.
    pub pool: PoolId,
    /// Rank of this node. Facts destined here are skipped.
    pub self_rank: TargetId,
    /// Targets whose failure triggered the rebuild.
    pub group: Arc<FailedTargetGroup>,
    /// Placement oracle.
    pub oracle: Arc<dyn PlacementOracle>,
    /// Source of the current pool map, used to refresh stale views.
    pub pool_map: Arc<dyn PoolMapSource>,
    /// Queue the scanners insert into.
    pub queue: Arc<ShipQueue>,
    /// Rebuild status, polled for the abort flag.
    pub tracker: Arc<RebuildTracker>,
    /// Fail points.
    pub faults: FaultInjector,
}

/// Counters from one or more scanners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Objects evaluated.
    pub scanned: u64,
    /// Facts newly inserted into the queue.
    pub queued: u64,
    /// Facts that were already queued.
    pub duplicates: u64,
    /// Objects whose destination is this node.
    pub skipped_self: u64,
    /// Objects that need no rebuild.
    pub not_needed: u64,
}

impl ScanStats {
    /// Add `other`'s counters to these.
    pub fn absorb(&mut self, other: &ScanStats) {
        self.scanned += other.scanned;
        self.queued += other.queued;
        self.duplicates += other.duplicates;
        self.skipped_self += other.skipped_self;
        self.not_needed += other.not_needed;
    }
}

/// Scans the objects of one local execution context.
pub struct Scanner {
    shared: Arc<ScanShared>,
    context: usize,
}

impl Scanner {
    /// Create a scanner for `context`.
    pub fn new(shared: Arc<ScanShared>, context: usize) -> Self {
        Self { shared, context }
    }

    /// Enumerate the context's objects and queue every fact that must ship.
    ///
    /// Stops early, without error, once the rebuild's abort flag is set.
    pub async fn run(&self, source: &dyn ObjectSource) -> Result<ScanStats, RebuildError> {
        let shared = &self.shared;
        let mut stats = ScanStats::default();

        while shared.faults.is_armed(FailPoint::ScanHang) && !shared.tracker.is_aborted() {
            tokio::task::yield_now().await;
        }

        let objects = source.list_objects(shared.pool, self.context).await?;
        debug!(context = self.context, objects = objects.len(), "scanner started");

        for object in &objects {
            if shared.tracker.is_aborted() {
                debug!(context = self.context, "rebuild aborted, scanner stopping");
                break;
            }
            if shared.faults.check(FailPoint::ScanObjectFail) {
                return Err(RebuildError::FailPoint(FailPoint::ScanObjectFail));
            }

            stats.scanned += 1;
            match self.evaluate(&object.oid).await? {
                RebuildDecision::NotNeeded => stats.not_needed += 1,
                RebuildDecision::Rebuild { target, .. } if target == shared.self_rank => {
                    debug!(oid = %object.oid, %target, "destination is self, skipping");
                    stats.skipped_self += 1;
                }
                RebuildDecision::Rebuild { target, shard } => {
                    match self.queue(object, target, shard) {
                        InsertOutcome::Inserted => stats.queued += 1,
                        InsertOutcome::AlreadyPresent => stats.duplicates += 1,
                    }
                }
            }
        }

        debug!(context = self.context, ?stats, "scanner finished");
        Ok(stats)
    }

    /// Ask the oracle where `oid` must go, refreshing a stale view until it
    /// is current.
    async fn evaluate(&self, oid: &ObjectId) -> Result<RebuildDecision, RebuildError> {
        let shared = &self.shared;
        loop {
            let map = shared.pool_map.current();
            match shared
                .oracle
                .find_rebuild_target(shared.pool, oid, map.version(), &shared.group)
            {
                Ok(decision) => return Ok(decision),
                Err(e @ (PlacementError::Stale { .. } | PlacementError::NoPlacementMap(_))) => {
                    if shared.faults.check(FailPoint::PlacementRefreshFail) {
                        return Err(RebuildError::FailPoint(FailPoint::PlacementRefreshFail));
                    }
                    debug!(%oid, error = %e, "placement view behind, refreshing");
                    shared.oracle.refresh(shared.pool, &map)?;
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn queue(&self, object: &LocalObject, target: TargetId, shard: u32) -> InsertOutcome {
        let outcome = self
            .shared
            .queue
            .insert(target, object.container, object.oid, shard);
        debug!(
            oid = %object.oid,
            container = %object.container,
            %target,
            shard,
            ?outcome,
            "rebuild fact"
        );
        outcome
    }
}

/// Run one scanner per execution context of `source`, at most `max_tasks`
/// at a time, and wait for all of them.
///
/// If any scanner fails the rest still run to completion and the first
/// error is returned.
pub async fn scan_collective(
    shared: Arc<ScanShared>,
    source: Arc<dyn ObjectSource>,
    max_tasks: usize,
) -> Result<ScanStats, RebuildError> {
    let contexts = source.contexts();
    let max_tasks = max_tasks.max(1);
    let mut tasks = JoinSet::new();
    let mut next = 0;
    let mut total = ScanStats::default();
    let mut first_error = None;

    loop {
        while next < contexts && tasks.len() < max_tasks {
            let scanner = Scanner::new(shared.clone(), next);
            let source = source.clone();
            tasks.spawn(async move { scanner.run(source.as_ref()).await });
            next += 1;
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        match joined {
            Ok(Ok(stats)) => total.absorb(&stats),
            Ok(Err(e)) => {
                warn!(error = %e, "scanner failed");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                warn!(error = %e, "scanner task failed");
                first_error.get_or_insert(RebuildError::TaskFailed(e.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => {
            debug!(contexts, ?total, "scan collective joined");
            Ok(total)
        }
    }
}
