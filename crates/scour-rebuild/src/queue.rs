//! Ship queue: deduplicated rebuild facts grouped by destination.
//!
//! The queue is a three-level tree of [`OrderedIndex`]es:
//!
//! ```text
//! target -> TargetRoot { containers, pending }
//!             container -> ContainerRoot { objects, pending }
//!                            (object, shard) -> shard
//! ```
//!
//! Scanners insert concurrently through [`ShipQueue::insert`], which holds
//! the queue's mutex for the whole lookup-then-insert. Draining happens only
//! after every scanner has joined, so [`ShipQueue::drain_batch`] takes
//! `&mut self` and never locks.

use std::sync::{Mutex, MutexGuard};

use scour_index::{OrderedIndex, Probe};
use scour_net::MAX_OBJECTS_PER_REQUEST;
use scour_types::{ContainerId, ObjectId, RebuildFact, ShardKey, TargetId};
use tracing::{debug, warn};

use crate::error::RebuildError;

/// Result of [`ShipQueue::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The fact was new and is now queued.
    Inserted,
    /// The same (target, container, object, shard) was already queued.
    AlreadyPresent,
}

/// Facts removed from the queue by one [`ShipQueue::drain_batch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainedBatch {
    /// The facts, in index order.
    pub facts: Vec<RebuildFact>,
    /// Containers whose subtree became empty and was removed.
    pub emptied_containers: Vec<ContainerId>,
    /// Whether the target's whole subtree is now gone.
    pub target_emptied: bool,
}

impl DrainedBatch {
    /// Number of facts drained.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Whether nothing was drained.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

#[derive(Debug, Default)]
struct ContainerRoot {
    objects: OrderedIndex<ShardKey, u32>,
    pending: u64,
}

/// Facts queued for one destination.
///
/// `pending` is a count only. Nothing ships when it crosses a threshold:
/// scanners never touch the network, and the queue is sent only while
/// draining.
#[derive(Debug, Default)]
struct TargetRoot {
    containers: OrderedIndex<ContainerId, ContainerRoot>,
    pending: u64,
}

/// Queue of rebuild facts waiting to be shipped, keyed by destination target.
#[derive(Debug, Default)]
pub struct ShipQueue {
    targets: Mutex<OrderedIndex<TargetId, TargetRoot>>,
}

impl ShipQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue "shard `shard` of `oid` in `container` must move to `target`".
    ///
    /// Missing target and container levels are created on first use.
    /// Inserting a key that is already queued changes nothing.
    pub fn insert(
        &self,
        target: TargetId,
        container: ContainerId,
        oid: ObjectId,
        shard: u32,
    ) -> InsertOutcome {
        let mut targets = self.lock();
        let (target_root, created) = targets.lookup_or_insert_with(target, TargetRoot::default);
        if created {
            debug!(%target, "target root created");
        }
        let (container_root, _) = target_root
            .containers
            .lookup_or_insert_with(container, ContainerRoot::default);

        let key = ShardKey::new(oid, shard);
        if container_root.objects.lookup(&key).is_some() {
            return InsertOutcome::AlreadyPresent;
        }
        container_root.objects.insert_or_update(key, shard);
        container_root.pending += 1;
        target_root.pending += 1;
        InsertOutcome::Inserted
    }

    /// Queue a fact produced by a scanner.
    pub fn insert_fact(&self, fact: &RebuildFact) -> InsertOutcome {
        self.insert(
            fact.destination_target,
            fact.container_id,
            fact.object_id,
            fact.shard_number,
        )
    }

    /// Remove up to `limit` facts for `target`.
    ///
    /// Containers are visited in index order. Within a container the first
    /// entry is taken and deleted, then the cursor is re-probed, until the
    /// container is empty or the batch is full. Emptied containers are
    /// removed from the target, and an emptied target from the queue.
    /// `limit` is clamped to `1..=512`.
    pub fn drain_batch(
        &mut self,
        target: TargetId,
        limit: usize,
    ) -> Result<DrainedBatch, RebuildError> {
        let limit = limit.clamp(1, MAX_OBJECTS_PER_REQUEST);
        let targets = self.targets_mut();
        let mut batch = DrainedBatch::default();

        let Some(target_root) = targets.lookup_mut(&target) else {
            batch.target_emptied = true;
            return Ok(batch);
        };

        let mut containers = target_root.containers.cursor();
        while batch.facts.len() < limit && containers.probe(Probe::First) {
            let container = *containers.key()?;
            let container_root = containers.value_mut()?;

            let before = batch.facts.len();
            let mut objects = container_root.objects.cursor();
            while batch.facts.len() < limit && objects.probe(Probe::First) {
                let (key, shard) = objects.delete()?;
                batch.facts.push(RebuildFact {
                    object_id: key.oid,
                    shard_number: shard,
                    container_id: container,
                    destination_target: target,
                    source_container: container,
                });
            }

            let taken = (batch.facts.len() - before) as u64;
            container_root.pending = container_root.pending.saturating_sub(taken);
            target_root.pending = target_root.pending.saturating_sub(taken);

            if container_root.objects.is_empty() {
                containers.delete()?;
                batch.emptied_containers.push(container);
            }
        }

        if target_root.containers.is_empty() {
            targets.delete(&target)?;
            batch.target_emptied = true;
        }

        debug!(
            %target,
            drained = batch.facts.len(),
            emptied_containers = batch.emptied_containers.len(),
            target_emptied = batch.target_emptied,
            "drained batch"
        );
        Ok(batch)
    }

    /// Drop everything still queued for `target`. Returns the number of facts dropped.
    pub fn discard_target(&mut self, target: TargetId) -> usize {
        match self.targets_mut().delete(&target) {
            Ok(root) => {
                let dropped = count_facts(&root);
                warn!(%target, dropped, "discarded queued facts for target");
                dropped
            }
            Err(_) => 0,
        }
    }

    /// Lowest target that still has queued facts.
    pub fn first_target(&mut self) -> Option<TargetId> {
        self.targets_mut().keys().next().copied()
    }

    /// Pending count recorded for `target` (0 if absent).
    pub fn pending(&self, target: TargetId) -> u64 {
        self.lock()
            .lookup(&target)
            .map(|root| root.pending)
            .unwrap_or(0)
    }

    /// Pending count recorded for `container` under `target` (0 if absent).
    pub fn container_pending(&self, target: TargetId, container: ContainerId) -> u64 {
        self.lock()
            .lookup(&target)
            .and_then(|root| root.containers.lookup(&container))
            .map(|root| root.pending)
            .unwrap_or(0)
    }

    /// Targets with queued facts, in order.
    pub fn targets(&self) -> Vec<TargetId> {
        self.lock().keys().copied().collect()
    }

    /// Total number of queued facts.
    pub fn len(&self) -> usize {
        self.lock().values().map(count_facts).sum()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Release the queue and every child index. Returns the number of facts
    /// that were still queued.
    pub fn destroy(self) -> usize {
        let targets = self
            .targets
            .into_inner()
            .expect("ship queue lock poisoned");
        let leftover: usize = targets.values().map(count_facts).sum();
        if leftover > 0 {
            debug!(leftover, targets = targets.len(), "destroying non-empty ship queue");
        }
        leftover
    }

    fn lock(&self) -> MutexGuard<'_, OrderedIndex<TargetId, TargetRoot>> {
        self.targets.lock().expect("ship queue lock poisoned")
    }

    fn targets_mut(&mut self) -> &mut OrderedIndex<TargetId, TargetRoot> {
        self.targets.get_mut().expect("ship queue lock poisoned")
    }
}

fn count_facts(root: &TargetRoot) -> usize {
    root.containers
        .values()
        .map(|container| container.objects.len())
        .sum()
}
