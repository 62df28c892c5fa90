//! Shared test utilities for scour-rebuild tests.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scour_net::{
    NetError, ObjectsReply, ObjectsRequest, ReplyStatus, ScanReply, ScanRequest, Transport,
};
use scour_placement::{
    FailedTargetGroup, PlacementMap, PoolMapSource, RebuildDecision, RingOracle, SharedPoolMap,
};
use scour_types::events::EventBus;
use scour_types::{
    ContainerId, MapVersion, ObjectId, PoolId, PoolMap, RebuildVersion, ShardKey, TargetId,
    TargetState,
};
use tracing_subscriber::EnvFilter;

use crate::config::RebuildConfig;
use crate::fault::FaultInjector;
use crate::leader::{RebuildDeps, ScanLeader};
use crate::source::{LocalObject, MemoryObjectSource};
use crate::tracker::RebuildTracker;

pub const VNODES: u16 = 16;

/// A queued or shipped fact, flattened for set comparisons.
pub type FactKey = (TargetId, ContainerId, ShardKey);

/// Install a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn pool() -> PoolId {
    PoolId::from(0x5c0_u128)
}

pub fn rank(n: u32) -> TargetId {
    TargetId::new(n)
}

pub fn container(n: u8) -> ContainerId {
    ContainerId::from(0xc0_0000_u128 + n as u128)
}

/// An object spread over three shards.
pub fn oid(seq: u64) -> ObjectId {
    ObjectId::with_shards(3, seq)
}

/// A map of `targets` ranks, all up.
pub fn healthy_map(targets: u32, version: MapVersion) -> PoolMap {
    PoolMap::new(version, (0..targets).map(|n| (rank(n), TargetState::Up)))
}

/// Test config with fast retries.
pub fn fast_config() -> RebuildConfig {
    let mut config = RebuildConfig::default();
    config.ship.retry_base_ms = 1;
    config.ship.retry_max_ms = 20;
    config.scan.contexts = 3;
    config
}

/// The facts a correct scan of `objects` must queue.
pub fn expected_facts(
    map: &PoolMap,
    failed: &[TargetId],
    objects: &[LocalObject],
    self_rank: TargetId,
) -> BTreeSet<FactKey> {
    let placement = PlacementMap::build(map, VNODES);
    let group = FailedTargetGroup::new(1, failed.to_vec());
    objects
        .iter()
        .filter_map(|object| match placement.find_rebuild(&object.oid, &group) {
            RebuildDecision::Rebuild { target, shard } if target != self_rank => {
                Some((target, object.container, ShardKey::new(object.oid, shard)))
            }
            _ => None,
        })
        .collect()
}

/// Flatten shipment requests into fact keys.
pub fn request_facts<'a>(
    requests: impl IntoIterator<Item = &'a (TargetId, ObjectsRequest)>,
) -> Vec<FactKey> {
    requests
        .into_iter()
        .flat_map(|(target, request)| {
            request
                .entries()
                .map(move |(oid, container, shard)| {
                    (*target, container, ShardKey::new(oid, shard))
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Mock transport
// ---------------------------------------------------------------------------

/// What the mock answers to one `send_objects` call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ReplyStatus),
    Timeout,
    Fatal,
}

type SendHook = Box<dyn Fn(TargetId) + Send + Sync>;

/// A transport that records requests and answers from a script.
///
/// Per-target scripted answers are used first, then the target's standing
/// answer, then success.
#[derive(Default)]
pub struct MockTransport {
    attempts: Mutex<Vec<(TargetId, ObjectsRequest)>>,
    delivered: Mutex<Vec<(TargetId, ObjectsRequest)>>,
    scripts: Mutex<HashMap<TargetId, VecDeque<Scripted>>>,
    standing: Mutex<HashMap<TargetId, Scripted>>,
    on_send: Mutex<Option<SendHook>>,
    scans: Mutex<Vec<(TargetId, ScanRequest)>>,
    scan_replies: Mutex<HashMap<TargetId, ScanReply>>,
    unreachable: Mutex<HashSet<TargetId>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the next call for `target` with `answer`.
    pub fn push(&self, target: TargetId, answer: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target)
            .or_default()
            .push_back(answer);
    }

    /// Answer every unscripted call for `target` with `answer`.
    pub fn always(&self, target: TargetId, answer: Scripted) {
        self.standing.lock().unwrap().insert(target, answer);
    }

    /// Run `hook` on every `send_objects` call, before answering.
    pub fn on_send(&self, hook: impl Fn(TargetId) + Send + Sync + 'static) {
        *self.on_send.lock().unwrap() = Some(Box::new(hook));
    }

    /// Reply to scan requests for `target` with `reply`.
    pub fn scan_reply(&self, target: TargetId, reply: ScanReply) {
        self.scan_replies.lock().unwrap().insert(target, reply);
    }

    /// Fail scan requests for `target` at the transport level.
    pub fn unreachable(&self, target: TargetId) {
        self.unreachable.lock().unwrap().insert(target);
    }

    pub fn attempts(&self) -> Vec<(TargetId, ObjectsRequest)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<(TargetId, ObjectsRequest)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn scans(&self) -> Vec<(TargetId, ScanRequest)> {
        self.scans.lock().unwrap().clone()
    }

    fn next_answer(&self, target: TargetId) -> Scripted {
        if let Some(answer) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&target)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        self.standing
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or(Scripted::Reply(ReplyStatus::Ok))
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_objects(
        &self,
        target: TargetId,
        request: &ObjectsRequest,
    ) -> Result<ObjectsReply, NetError> {
        self.attempts
            .lock()
            .unwrap()
            .push((target, request.clone()));
        if let Some(hook) = self.on_send.lock().unwrap().as_ref() {
            hook(target);
        }

        match self.next_answer(target) {
            Scripted::Reply(status) => {
                if status.is_ok() {
                    self.delivered
                        .lock()
                        .unwrap()
                        .push((target, request.clone()));
                }
                Ok(ObjectsReply { status })
            }
            Scripted::Timeout => Err(NetError::Timeout(Duration::from_millis(5))),
            Scripted::Fatal => Err(NetError::UnknownTarget(target)),
        }
    }

    async fn send_scan(
        &self,
        target: TargetId,
        request: &ScanRequest,
    ) -> Result<ScanReply, NetError> {
        self.scans.lock().unwrap().push((target, request.clone()));
        if self.unreachable.lock().unwrap().contains(&target) {
            return Err(NetError::Timeout(Duration::from_millis(5)));
        }
        Ok(self
            .scan_replies
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or_else(ScanReply::ok))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// One node's view of a six-target pool where target 1 has failed.
pub struct Fixture {
    pub self_rank: TargetId,
    pub failed: Vec<TargetId>,
    pub pool_map: SharedPoolMap,
    pub oracle: Arc<RingOracle>,
    pub source: Arc<MemoryObjectSource>,
    pub transport: Arc<MockTransport>,
    pub events: EventBus,
    pub faults: FaultInjector,
    pub config: RebuildConfig,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let failed = vec![rank(1)];
        let map = healthy_map(6, 1).with_target_state(rank(1), TargetState::Down);
        Self {
            self_rank: rank(0),
            failed,
            pool_map: SharedPoolMap::new(map),
            oracle: Arc::new(RingOracle::new(VNODES)),
            source: Arc::new(MemoryObjectSource::new(4)),
            transport: MockTransport::new(),
            events: EventBus::new(),
            faults: FaultInjector::new(),
            config: fast_config(),
        }
    }

    /// Hold `per_container` objects in each of `containers` containers.
    pub fn populate(&self, containers: u8, per_container: u64) -> Vec<LocalObject> {
        let objects: Vec<LocalObject> = (0..containers)
            .flat_map(|c| {
                (0..per_container).map(move |seq| LocalObject::new(container(c), oid(seq), 0))
            })
            .collect();
        self.source.extend(pool(), objects.clone());
        objects
    }

    pub fn map(&self) -> Arc<PoolMap> {
        self.pool_map.current()
    }

    pub fn expected(&self, objects: &[LocalObject]) -> BTreeSet<FactKey> {
        expected_facts(&self.map(), &self.failed, objects, self.self_rank)
    }

    pub fn deps(&self) -> RebuildDeps {
        RebuildDeps {
            self_rank: self.self_rank,
            config: Arc::new(self.config.clone()),
            oracle: self.oracle.clone(),
            source: self.source.clone(),
            transport: self.transport.clone(),
            events: self.events.clone(),
            faults: self.faults.clone(),
        }
    }

    pub fn request(&self, rebuild_version: RebuildVersion) -> ScanRequest {
        ScanRequest {
            pool_id: pool(),
            pool_map_version: self.map().version(),
            rebuild_version,
            leader_term: 1,
            master_rank: rank(5),
            failed_targets: self.failed.clone(),
        }
    }

    pub fn tracker(&self, request: &ScanRequest) -> Arc<RebuildTracker> {
        Arc::new(RebuildTracker::new(
            request.pool_id,
            request.rebuild_version,
            request.leader_term,
            request.master_rank,
        ))
    }

    pub fn leader(&self, request: &ScanRequest) -> (ScanLeader, Arc<RebuildTracker>) {
        let tracker = self.tracker(request);
        let leader = ScanLeader::new(
            self.deps(),
            Arc::new(self.pool_map.clone()),
            tracker.clone(),
            request,
        );
        (leader, tracker)
    }
}
