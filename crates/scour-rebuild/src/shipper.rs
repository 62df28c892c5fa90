//! Shipper: drains the ship queue one target at a time and sends the facts
//! in batches.
//!
//! Retry policy for one batch:
//!
//! - success: the batch is done.
//! - transient transport error, or the target replied "again": if the pool
//!   map now shows the target down or gone, the rest of its work is dropped
//!   (a later rebuild round rediscovers it). Otherwise yield, back off, and
//!   send the same batch again. There is no attempt limit.
//! - anything else: fatal. The batch has already left the queue and is not
//!   put back.
//!
//! The shipper never looks at the abort flag. A batch being retried ends only
//! on delivery, a fatal error, or its target being marked down or absent; the
//! leader checks for an abort between targets.

use std::sync::Arc;
use std::time::Duration;

use scour_net::{ObjectsRequest, ReplyStatus, Transport};
use scour_placement::PoolMapSource;
use scour_types::events::{BatchShipped, EventBus, ShipmentAbandoned};
use scour_types::{PoolId, RebuildVersion, TargetId};
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::RebuildConfig;
use crate::error::RebuildError;
use crate::fault::{FailPoint, FaultInjector};
use crate::queue::ShipQueue;

/// Counters from shipping one or more targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShipStats {
    /// Batches delivered.
    pub batches: u64,
    /// Facts delivered.
    pub shipped: u64,
    /// Facts dropped because their target went down.
    pub abandoned: u64,
    /// Facts drained but deliberately not sent.
    pub dropped: u64,
}

impl ShipStats {
    /// Add `other`'s counters to these.
    pub fn absorb(&mut self, other: &ShipStats) {
        self.batches += other.batches;
        self.shipped += other.shipped;
        self.abandoned += other.abandoned;
        self.dropped += other.dropped;
    }
}

enum BatchOutcome {
    Delivered,
    TargetGone,
}

/// Sends queued facts to their destination targets.
pub struct Shipper {
    pool: PoolId,
    rebuild_version: RebuildVersion,
    self_rank: TargetId,
    transport: Arc<dyn Transport>,
    pool_map: Arc<dyn PoolMapSource>,
    send_limit: usize,
    retry_base: Duration,
    retry_max: Duration,
    events: EventBus,
    faults: FaultInjector,
}

impl Shipper {
    /// Create a shipper for one rebuild.
    pub fn new(
        pool: PoolId,
        rebuild_version: RebuildVersion,
        self_rank: TargetId,
        transport: Arc<dyn Transport>,
        pool_map: Arc<dyn PoolMapSource>,
        config: &RebuildConfig,
    ) -> Self {
        Self {
            pool,
            rebuild_version,
            self_rank,
            transport,
            pool_map,
            send_limit: config.send_limit(),
            retry_base: config.retry_base(),
            retry_max: config.retry_max(),
            events: EventBus::new(),
            faults: FaultInjector::new(),
        }
    }

    /// Emit shipment events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = bus;
        self
    }

    /// Use `faults` for fail points.
    pub fn with_faults(mut self, faults: FaultInjector) -> Self {
        self.faults = faults;
        self
    }

    /// Ship everything queued for `target`.
    ///
    /// Returns once the target's subtree is gone from `queue`: either every
    /// batch was delivered (or dropped by a fail point), or the target went
    /// down and its remaining facts were discarded.
    #[tracing::instrument(skip(self, queue), fields(pool = %self.pool, version = self.rebuild_version))]
    pub async fn send_target(
        &self,
        queue: &mut ShipQueue,
        target: TargetId,
    ) -> Result<ShipStats, RebuildError> {
        let mut stats = ShipStats::default();

        loop {
            let batch = queue.drain_batch(target, self.send_limit)?;
            if batch.is_empty() {
                break;
            }
            let count = batch.len();

            if self.faults.check(FailPoint::SendObjectsDrop) {
                warn!(count, "dropping batch without sending");
                stats.dropped += count as u64;
            } else {
                if self.faults.check(FailPoint::SendObjectsFail) {
                    return Err(RebuildError::FailPoint(FailPoint::SendObjectsFail));
                }

                let request = ObjectsRequest::from_facts(
                    self.pool,
                    self.rebuild_version,
                    self.self_rank,
                    &batch.facts,
                );
                match self.send_batch(target, &request).await? {
                    BatchOutcome::Delivered => {
                        stats.batches += 1;
                        stats.shipped += count as u64;
                        debug!(count, "batch delivered");
                        self.events.emit(BatchShipped {
                            pool_id: self.pool,
                            target,
                            count,
                        });
                    }
                    BatchOutcome::TargetGone => {
                        let dropped = count + queue.discard_target(target);
                        stats.abandoned += dropped as u64;
                        warn!(dropped, "target is down, abandoning shipment");
                        self.events.emit(ShipmentAbandoned {
                            pool_id: self.pool,
                            target,
                            dropped,
                        });
                        break;
                    }
                }
            }

            if batch.target_emptied {
                break;
            }
        }

        Ok(stats)
    }

    /// Send one batch until it is delivered or its target goes down.
    async fn send_batch(
        &self,
        target: TargetId,
        request: &ObjectsRequest,
    ) -> Result<BatchOutcome, RebuildError> {
        let mut backoff = Backoff::new(self.retry_base, self.retry_max);
        let mut map_rx = self.pool_map.subscribe();

        loop {
            let reason = match self.transport.send_objects(target, request).await {
                Ok(reply) => match reply.status {
                    ReplyStatus::Ok => return Ok(BatchOutcome::Delivered),
                    ReplyStatus::Again => "target asked to retry".to_string(),
                    status @ ReplyStatus::Failed { .. } => {
                        return Err(RebuildError::Remote { target, status });
                    }
                },
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(e.into()),
            };

            if self.pool_map.current().is_down_or_absent(target) {
                return Ok(BatchOutcome::TargetGone);
            }

            let delay = backoff.next_delay();
            warn!(
                %target,
                attempt = backoff.attempt(),
                ?delay,
                %reason,
                "batch send failed, retrying"
            );
            tokio::task::yield_now().await;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = map_rx.changed() => {}
            }
        }
    }
}
