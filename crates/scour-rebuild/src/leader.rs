//! Scan leader: the state machine that runs one rebuild scan on one node.
//!
//! ```text
//! WaitingForPlacement -> Scanning -> Draining -> Completed
//!          \                 \           \
//!           +-----------------+-----------+--> Aborted
//! ```
//!
//! The leader owns the [`ShipQueue`] and the failed-target group from
//! construction. `ScanResources` releases them, together with the
//! placement view and the tracker's "still scanning" flag, exactly once on
//! every exit path, including the leader future being dropped.

use std::fmt;
use std::sync::Arc;

use scour_net::{ScanRequest, Transport};
use scour_placement::{FailedTargetGroup, PlacementOracle, PoolMapSource};
use scour_types::events::{EventBus, ScanAborted, ScanCompleted, ScanStarted, ScanTeardown};
use scour_types::{MapVersion, PoolId, PoolMap, RebuildVersion, TargetId};
use tracing::{debug, error, info};

use crate::config::RebuildConfig;
use crate::error::RebuildError;
use crate::fault::{FailPoint, FaultInjector};
use crate::queue::ShipQueue;
use crate::scanner::{ScanShared, ScanStats, scan_collective};
use crate::shipper::{ShipStats, Shipper};
use crate::source::ObjectSource;
use crate::tracker::RebuildTracker;

/// Node-wide collaborators every scan leader needs.
#[derive(Clone)]
pub struct RebuildDeps {
    /// Rank of this node.
    pub self_rank: TargetId,
    /// Pipeline tuning.
    pub config: Arc<RebuildConfig>,
    /// Placement oracle shared by every rebuild on this node.
    pub oracle: Arc<dyn PlacementOracle>,
    /// Local objects.
    pub source: Arc<dyn ObjectSource>,
    /// Outgoing RPCs.
    pub transport: Arc<dyn Transport>,
    /// Event bus for scan and shipment events.
    pub events: EventBus,
    /// Fail points.
    pub faults: FaultInjector,
}

impl fmt::Debug for RebuildDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildDeps")
            .field("self_rank", &self.self_rank)
            .finish_non_exhaustive()
    }
}

/// Phase of a scan leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Waiting for a pool map and placement view new enough for the request.
    WaitingForPlacement,
    /// Scanners are filling the ship queue.
    Scanning,
    /// The shipper is emptying the ship queue.
    Draining,
    /// Every fact was shipped.
    Completed,
    /// A fatal error or an abort ended the scan.
    Aborted,
}

impl ScanState {
    /// Lowercase name used in logs and events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForPlacement => "waiting_for_placement",
            Self::Scanning => "scanning",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// Terminal state: [`ScanState::Completed`] or [`ScanState::Aborted`].
    pub state: ScanState,
    /// Phase the scan was in when it aborted.
    pub failed_in: Option<ScanState>,
    /// Scanner counters.
    pub scan: ScanStats,
    /// Shipper counters.
    pub ship: ShipStats,
    /// Facts still queued at teardown.
    pub leftover_facts: usize,
    /// The fatal error, if any.
    pub error: Option<String>,
}

/// Everything a scan must release when it ends.
struct ScanResources {
    pool: PoolId,
    rebuild_version: RebuildVersion,
    state: ScanState,
    queue: Option<Arc<ShipQueue>>,
    group: Option<Arc<FailedTargetGroup>>,
    oracle: Arc<dyn PlacementOracle>,
    tracker: Arc<RebuildTracker>,
    events: EventBus,
    released: bool,
}

impl ScanResources {
    /// Release the queue, the failed-target group and the placement view,
    /// and clear the tracker's scanning flag. Later calls do nothing.
    fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        let leftover = match self.queue.take() {
            Some(queue) => match Arc::try_unwrap(queue) {
                Ok(queue) => queue.destroy(),
                // A scanner task still holds it; its last reference frees it.
                Err(shared) => shared.len(),
            },
            None => 0,
        };
        self.group = None;
        self.oracle.disconnect(self.pool);
        self.tracker.scan_done();

        debug!(
            pool = %self.pool,
            version = self.rebuild_version,
            state = %self.state,
            leftover,
            "scan resources released"
        );
        self.events.emit(ScanTeardown {
            pool_id: self.pool,
            rebuild_version: self.rebuild_version,
            state: self.state.as_str(),
            leftover_facts: leftover,
        });
        leftover
    }
}

impl Drop for ScanResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs one rebuild scan for one `(pool, rebuild_version)`.
pub struct ScanLeader {
    deps: RebuildDeps,
    pool_map: Arc<dyn PoolMapSource>,
    tracker: Arc<RebuildTracker>,
    pool_map_version: MapVersion,
    leader_term: u64,
    resources: ScanResources,
}

impl ScanLeader {
    /// Create a leader for `request`. The ship queue is allocated here.
    pub fn new(
        deps: RebuildDeps,
        pool_map: Arc<dyn PoolMapSource>,
        tracker: Arc<RebuildTracker>,
        request: &ScanRequest,
    ) -> Self {
        let group = FailedTargetGroup::new(request.rebuild_version, request.failed_targets.clone());
        let resources = ScanResources {
            pool: request.pool_id,
            rebuild_version: request.rebuild_version,
            state: ScanState::WaitingForPlacement,
            queue: Some(Arc::new(ShipQueue::new())),
            group: Some(Arc::new(group)),
            oracle: deps.oracle.clone(),
            tracker: tracker.clone(),
            events: deps.events.clone(),
            released: false,
        };
        Self {
            deps,
            pool_map,
            tracker,
            pool_map_version: request.pool_map_version,
            leader_term: request.leader_term,
            resources,
        }
    }

    /// Current phase.
    pub fn state(&self) -> ScanState {
        self.resources.state
    }

    /// Run the scan to a terminal state and release its resources.
    #[tracing::instrument(
        skip(self),
        fields(pool = %self.resources.pool, version = self.resources.rebuild_version)
    )]
    pub async fn run(mut self) -> ScanSummary {
        let pool = self.resources.pool;
        let rebuild_version = self.resources.rebuild_version;
        self.deps.events.emit(ScanStarted {
            pool_id: pool,
            rebuild_version,
            leader_term: self.leader_term,
        });

        let mut scan = ScanStats::default();
        let mut ship = ShipStats::default();
        let result = self.execute(&mut scan, &mut ship).await;

        let (state, failed_in, error) = match result {
            Ok(()) => {
                self.enter(ScanState::Completed);
                info!(?scan, ?ship, "rebuild scan completed");
                self.deps.events.emit(ScanCompleted {
                    pool_id: pool,
                    rebuild_version,
                    objects_scanned: scan.scanned,
                    facts_queued: scan.queued,
                    facts_shipped: ship.shipped,
                });
                (ScanState::Completed, None, None)
            }
            Err(e) => {
                let failed_in = self.state();
                error!(state = %failed_in, error = %e, "rebuild scan aborted");
                let reason = e.to_string();
                self.tracker.record_error(reason.clone());
                self.deps.events.emit(ScanAborted {
                    pool_id: pool,
                    rebuild_version,
                    reason: reason.clone(),
                });
                (ScanState::Aborted, Some(failed_in), Some(reason))
            }
        };

        let leftover_facts = self.resources.release();
        ScanSummary {
            state,
            failed_in,
            scan,
            ship,
            leftover_facts,
            error,
        }
    }

    async fn execute(
        &mut self,
        scan: &mut ScanStats,
        ship: &mut ShipStats,
    ) -> Result<(), RebuildError> {
        self.enter(ScanState::WaitingForPlacement);
        self.wait_for_placement().await?;

        self.enter(ScanState::Scanning);
        *scan = self.scan().await?;
        if self.tracker.is_aborted() {
            return Err(RebuildError::Aborted);
        }

        self.enter(ScanState::Draining);
        self.drain(ship).await
    }

    fn enter(&mut self, state: ScanState) {
        info!(from = %self.resources.state, to = %state, "scan state");
        self.resources.state = state;
    }

    /// Wait for a pool map at least as new as the request's, check every
    /// failed rank is in it, and bring the placement view up to it.
    async fn wait_for_placement(&self) -> Result<Arc<PoolMap>, RebuildError> {
        let pool = self.resources.pool;
        let mut map_rx = self.pool_map.subscribe();
        let map = loop {
            let map = map_rx.borrow_and_update().clone();
            if map.version() >= self.pool_map_version {
                break map;
            }
            debug!(
                have = map.version(),
                want = self.pool_map_version,
                "waiting for pool map"
            );
            tokio::select! {
                changed = map_rx.changed() => {
                    if changed.is_err() {
                        return Err(RebuildError::UnknownPool(pool));
                    }
                }
                _ = self.tracker.aborted() => return Err(RebuildError::Aborted),
            }
        };

        let group = self.group()?;
        for &rank in &group.targets {
            if map.find_target(rank).is_none() {
                return Err(RebuildError::TargetNotInPoolMap(rank));
            }
        }

        if self.deps.faults.check(FailPoint::PlacementRefreshFail) {
            return Err(RebuildError::FailPoint(FailPoint::PlacementRefreshFail));
        }
        let view = self.deps.oracle.refresh(pool, &map)?;
        info!(view_version = view, failed = ?group.targets, "placement view ready");
        Ok(map)
    }

    async fn scan(&self) -> Result<ScanStats, RebuildError> {
        let queue = self
            .resources
            .queue
            .clone()
            .ok_or(RebuildError::QueueBusy)?;
        let shared = Arc::new(ScanShared {
            pool: self.resources.pool,
            self_rank: self.deps.self_rank,
            group: self.group()?,
            oracle: self.deps.oracle.clone(),
            pool_map: self.pool_map.clone(),
            queue,
            tracker: self.tracker.clone(),
            faults: self.deps.faults.clone(),
        });
        scan_collective(shared, self.deps.source.clone(), self.deps.config.contexts()).await
    }

    async fn drain(&mut self, stats: &mut ShipStats) -> Result<(), RebuildError> {
        let shipper = Shipper::new(
            self.resources.pool,
            self.resources.rebuild_version,
            self.deps.self_rank,
            self.deps.transport.clone(),
            self.pool_map.clone(),
            &self.deps.config,
        )
        .with_event_bus(self.deps.events.clone())
        .with_faults(self.deps.faults.clone());

        let queue = self
            .resources
            .queue
            .as_mut()
            .and_then(Arc::get_mut)
            .ok_or(RebuildError::QueueBusy)?;
        info!(targets = queue.targets().len(), facts = queue.len(), "draining ship queue");

        while let Some(target) = queue.first_target() {
            if self.tracker.is_aborted() {
                return Err(RebuildError::Aborted);
            }
            let shipped = shipper.send_target(queue, target).await?;
            stats.absorb(&shipped);
        }
        Ok(())
    }

    fn group(&self) -> Result<Arc<FailedTargetGroup>, RebuildError> {
        self.resources
            .group
            .clone()
            .ok_or_else(|| RebuildError::InvalidRequest("failed-target group released".into()))
    }
}
