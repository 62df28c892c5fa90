//! Per-rebuild status tracking.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use scour_types::{PoolId, RebuildVersion, TargetId};
use tokio::sync::{Notify, watch};
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct Leader {
    term: u64,
    master_rank: TargetId,
}

/// Snapshot of a [`RebuildTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    /// Pool being rebuilt.
    pub pool: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Latest leader term seen.
    pub leader_term: u64,
    /// Rank of the leader that sent the latest term.
    pub master_rank: TargetId,
    /// Whether the scan is still running.
    pub scanning: bool,
    /// Whether an abort was requested.
    pub aborted: bool,
    /// First fatal error, if the scan failed.
    pub error: Option<String>,
}

/// Local bookkeeping for one `(pool, rebuild_version)`.
///
/// Shared between the scan-trigger handler, the running scan leader, and
/// anything polling rebuild status.
#[derive(Debug)]
pub struct RebuildTracker {
    pool: PoolId,
    rebuild_version: RebuildVersion,
    leader: Mutex<Leader>,
    aborted: AtomicBool,
    abort_notify: Notify,
    first_error: Mutex<Option<String>>,
    scanning: watch::Sender<bool>,
}

impl RebuildTracker {
    /// Create a tracker for a scan that is about to start.
    pub fn new(
        pool: PoolId,
        rebuild_version: RebuildVersion,
        leader_term: u64,
        master_rank: TargetId,
    ) -> Self {
        let (scanning, _) = watch::channel(true);
        Self {
            pool,
            rebuild_version,
            leader: Mutex::new(Leader {
                term: leader_term,
                master_rank,
            }),
            aborted: AtomicBool::new(false),
            abort_notify: Notify::new(),
            first_error: Mutex::new(None),
            scanning,
        }
    }

    /// Pool being rebuilt.
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Rebuild episode.
    pub fn rebuild_version(&self) -> RebuildVersion {
        self.rebuild_version
    }

    /// Latest leader term.
    pub fn leader_term(&self) -> u64 {
        self.leader().term
    }

    /// Rank of the current leader.
    pub fn master_rank(&self) -> TargetId {
        self.leader().master_rank
    }

    /// Record a scan request from `master_rank` at `term`.
    ///
    /// Returns `false`, changing nothing, unless `term` is newer than the
    /// stored one.
    pub fn update_leader(&self, term: u64, master_rank: TargetId) -> bool {
        let mut leader = self.leader.lock().expect("tracker leader lock poisoned");
        if term <= leader.term {
            return false;
        }
        if leader.master_rank != master_rank {
            info!(
                pool = %self.pool,
                version = self.rebuild_version,
                old = %leader.master_rank,
                new = %master_rank,
                term,
                "rebuild master rank changed"
            );
        }
        *leader = Leader { term, master_rank };
        true
    }

    /// Ask the scan to stop. Scanners notice within one object.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            info!(pool = %self.pool, version = self.rebuild_version, "rebuild abort requested");
        }
        self.abort_notify.notify_waiters();
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolve once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        let notified = self.abort_notify.notified();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }

    /// Record a fatal error. Only the first one is kept.
    pub fn record_error(&self, error: impl Into<String>) -> bool {
        let mut slot = self
            .first_error
            .lock()
            .expect("tracker error lock poisoned");
        if slot.is_some() {
            return false;
        }
        *slot = Some(error.into());
        true
    }

    /// First fatal error recorded.
    pub fn first_error(&self) -> Option<String> {
        self.first_error
            .lock()
            .expect("tracker error lock poisoned")
            .clone()
    }

    /// Clear the "still scanning" flag.
    pub fn scan_done(&self) {
        self.scanning.send_replace(false);
    }

    /// Whether the scan is still running.
    pub fn is_scanning(&self) -> bool {
        *self.scanning.borrow()
    }

    /// Wait until the scan has finished, successfully or not.
    pub async fn wait_scan_done(&self) {
        let mut rx = self.scanning.subscribe();
        // The sender lives in `self`, so this cannot fail.
        let _ = rx.wait_for(|scanning| !*scanning).await;
    }

    /// Snapshot the tracker.
    pub fn status(&self) -> TrackerStatus {
        let leader = self.leader();
        TrackerStatus {
            pool: self.pool,
            rebuild_version: self.rebuild_version,
            leader_term: leader.term,
            master_rank: leader.master_rank,
            scanning: self.is_scanning(),
            aborted: self.is_aborted(),
            error: self.first_error(),
        }
    }

    fn leader(&self) -> Leader {
        *self.leader.lock().expect("tracker leader lock poisoned")
    }
}
