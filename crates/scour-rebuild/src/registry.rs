//! Scan-trigger handling: the table of rebuilds tracked on this node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use scour_net::{ReplyStatus, ScanReply, ScanRequest};
use scour_placement::PoolMapSource;
use scour_types::{PoolId, RebuildVersion};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RebuildError;
use crate::fault::FailPoint;
use crate::leader::{RebuildDeps, ScanLeader, ScanSummary};
use crate::tracker::RebuildTracker;

type TrackerKey = (PoolId, RebuildVersion);

/// Rebuilds tracked on this node, keyed by `(pool, rebuild_version)`.
pub struct RebuildRegistry {
    deps: RebuildDeps,
    pool_maps: RwLock<HashMap<PoolId, Arc<dyn PoolMapSource>>>,
    trackers: Mutex<HashMap<TrackerKey, Arc<RebuildTracker>>>,
}

impl RebuildRegistry {
    /// Create an empty registry.
    pub fn new(deps: RebuildDeps) -> Self {
        Self {
            deps,
            pool_maps: RwLock::new(HashMap::new()),
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// Collaborators used for new scans.
    pub fn deps(&self) -> &RebuildDeps {
        &self.deps
    }

    /// Make `pool` known, with `source` as its pool map.
    pub fn register_pool(&self, pool: PoolId, source: Arc<dyn PoolMapSource>) {
        self.pool_maps
            .write()
            .expect("pool maps lock poisoned")
            .insert(pool, source);
    }

    /// Handle an inbound scan-trigger request.
    ///
    /// A request for a rebuild already tracked here only updates the leader
    /// bookkeeping, and only when its term is newer. Otherwise a new scan
    /// leader is spawned. On failure the reply names this node's rank.
    pub fn handle_scan(&self, request: &ScanRequest) -> ScanReply {
        match self.start_scan(request) {
            Ok(_) => ScanReply::ok(),
            Err(e) => {
                warn!(
                    pool = %request.pool_id,
                    version = request.rebuild_version,
                    error = %e,
                    "failed to start rebuild scan"
                );
                ScanReply::failed(
                    ReplyStatus::failed(e.code(), e.to_string()),
                    self.deps.self_rank,
                )
            }
        }
    }

    /// Start a scan for `request`, or update the tracked one.
    ///
    /// Returns the spawned leader's handle when a new scan was started.
    pub fn start_scan(
        &self,
        request: &ScanRequest,
    ) -> Result<Option<JoinHandle<ScanSummary>>, RebuildError> {
        let key = (request.pool_id, request.rebuild_version);

        if let Some(tracker) = self.tracker(request.pool_id, request.rebuild_version) {
            if tracker.update_leader(request.leader_term, request.master_rank) {
                debug!(
                    pool = %request.pool_id,
                    version = request.rebuild_version,
                    term = request.leader_term,
                    "leader term updated"
                );
            }
            return Ok(None);
        }

        if self.deps.faults.check(FailPoint::TargetStartFail) {
            return Err(RebuildError::FailPoint(FailPoint::TargetStartFail));
        }
        if request.failed_targets.is_empty() {
            return Err(RebuildError::InvalidRequest(
                "no failed targets in scan request".into(),
            ));
        }
        let pool_map = self
            .pool_maps
            .read()
            .expect("pool maps lock poisoned")
            .get(&request.pool_id)
            .cloned()
            .ok_or(RebuildError::UnknownPool(request.pool_id))?;

        let tracker = {
            let mut trackers = self.trackers.lock().expect("trackers lock poisoned");
            if let Some(tracker) = trackers.get(&key) {
                // Lost a race with a concurrent request for the same rebuild.
                tracker.update_leader(request.leader_term, request.master_rank);
                return Ok(None);
            }
            let tracker = Arc::new(RebuildTracker::new(
                request.pool_id,
                request.rebuild_version,
                request.leader_term,
                request.master_rank,
            ));
            trackers.insert(key, tracker.clone());
            tracker
        };

        info!(
            pool = %request.pool_id,
            version = request.rebuild_version,
            term = request.leader_term,
            master = %request.master_rank,
            failed = ?request.failed_targets,
            "starting rebuild scan"
        );
        let leader = ScanLeader::new(self.deps.clone(), pool_map, tracker, request);
        Ok(Some(tokio::spawn(leader.run())))
    }

    /// Tracker for `(pool, rebuild_version)`.
    pub fn tracker(
        &self,
        pool: PoolId,
        rebuild_version: RebuildVersion,
    ) -> Option<Arc<RebuildTracker>> {
        self.trackers
            .lock()
            .expect("trackers lock poisoned")
            .get(&(pool, rebuild_version))
            .cloned()
    }

    /// Request an abort of a tracked rebuild. Returns whether it was tracked.
    pub fn abort(&self, pool: PoolId, rebuild_version: RebuildVersion) -> bool {
        match self.tracker(pool, rebuild_version) {
            Some(tracker) => {
                tracker.abort();
                true
            }
            None => false,
        }
    }

    /// Stop tracking `(pool, rebuild_version)`.
    pub fn forget(
        &self,
        pool: PoolId,
        rebuild_version: RebuildVersion,
    ) -> Option<Arc<RebuildTracker>> {
        self.trackers
            .lock()
            .expect("trackers lock poisoned")
            .remove(&(pool, rebuild_version))
    }

    /// Number of tracked rebuilds.
    pub fn len(&self) -> usize {
        self.trackers.lock().expect("trackers lock poisoned").len()
    }

    /// Whether no rebuild is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
