//! Shared test harness for Scour rebuild integration tests.
//!
//! Provides [`RebuildCluster`]: N nodes, each with its own rebuild registry,
//! object source and placement oracle, wired together by an in-process
//! transport that routes scan triggers and object shipments through the
//! same dispatch path the QUIC protocol handler uses.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock as StdRwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use scour_net::{
    NetError, ObjectsReply, ObjectsRequest, RebuildMessage, ReplyStatus, ScanReply, ScanRequest,
    Transport,
};
use scour_placement::{
    FailedTargetGroup, PlacementMap, PoolMapSource, RebuildDecision, RingOracle, SharedPoolMap,
};
use scour_rebuild::{
    FaultInjector, LocalObject, MemoryObjectSource, ObjectsSink, RebuildConfig, RebuildDeps,
    RebuildRegistry, RebuildTracker, dispatch, trigger_scan,
};
use scour_types::events::EventBus;
use scour_types::*;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

/// Ring resolution for every node.
const VNODES: u16 = 32;

/// A shipped or expected fact, flattened for set comparisons.
pub type FactKey = (TargetId, ContainerId, ShardKey);

/// Install a test subscriber once. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The pool every test rebuilds.
pub fn pool() -> PoolId {
    PoolId::from(0x9001_u128)
}

pub fn rank(i: usize) -> TargetId {
    TargetId::new(i as u32)
}

// =========================================================================
// Object sink
// =========================================================================

/// Sink that records every batch a node accepts.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<ObjectsRequest>>,
}

impl RecordingSink {
    pub fn received(&self) -> Vec<ObjectsRequest> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectsSink for RecordingSink {
    async fn receive(&self, request: ObjectsRequest) -> ReplyStatus {
        self.received.lock().unwrap().push(request);
        ReplyStatus::Ok
    }
}

// =========================================================================
// Mock transport
// =========================================================================

struct Peer {
    registry: Weak<RebuildRegistry>,
    sink: Arc<RecordingSink>,
}

/// Routes RPCs to the peers' registries and sinks.
///
/// Nodes in `down` are unreachable: every call to them times out.
struct ClusterTransport {
    peers: Arc<StdRwLock<HashMap<TargetId, Peer>>>,
    down: Arc<RwLock<HashSet<TargetId>>>,
    timeout: Duration,
}

impl ClusterTransport {
    async fn peer(
        &self,
        target: TargetId,
    ) -> Result<(Arc<RebuildRegistry>, Arc<RecordingSink>), NetError> {
        if self.down.read().await.contains(&target) {
            tokio::time::sleep(self.timeout).await;
            return Err(NetError::Timeout(self.timeout));
        }
        let peers = self.peers.read().unwrap();
        let peer = peers.get(&target).ok_or(NetError::UnknownTarget(target))?;
        let registry = peer
            .registry
            .upgrade()
            .ok_or_else(|| NetError::Connect("peer shut down".into()))?;
        Ok((registry, peer.sink.clone()))
    }
}

#[async_trait]
impl Transport for ClusterTransport {
    async fn send_objects(
        &self,
        target: TargetId,
        request: &ObjectsRequest,
    ) -> Result<ObjectsReply, NetError> {
        let (registry, sink) = self.peer(target).await?;
        match dispatch(
            &registry,
            sink.as_ref(),
            RebuildMessage::ObjectsRequest(request.clone()),
        )
        .await
        {
            Some(RebuildMessage::ObjectsReply(reply)) => Ok(reply),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn send_scan(
        &self,
        target: TargetId,
        request: &ScanRequest,
    ) -> Result<ScanReply, NetError> {
        let (registry, sink) = self.peer(target).await?;
        match dispatch(
            &registry,
            sink.as_ref(),
            RebuildMessage::ScanRequest(request.clone()),
        )
        .await
        {
            Some(RebuildMessage::ScanReply(reply)) => Ok(reply),
            other => Err(NetError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

// =========================================================================
// Cluster
// =========================================================================

/// One simulated storage node.
pub struct Node {
    pub rank: TargetId,
    pub registry: Arc<RebuildRegistry>,
    pub source: Arc<MemoryObjectSource>,
    pub sink: Arc<RecordingSink>,
    pub oracle: Arc<RingOracle>,
    pub events: EventBus,
    pub faults: FaultInjector,
}

/// A simulated N-node pool for rebuild integration tests.
pub struct RebuildCluster {
    nodes: Vec<Node>,
    pool_map: SharedPoolMap,
    transport: Arc<dyn Transport>,
    down: Arc<RwLock<HashSet<TargetId>>>,
    holdings: Vec<Vec<LocalObject>>,
}

impl RebuildCluster {
    /// Create an `n`-node cluster with every target up.
    pub fn new(n: usize) -> Self {
        assert!(n >= 4, "need at least 4 nodes for 3-shard objects");
        init_tracing();

        let mut config = RebuildConfig::default();
        config.ship.retry_base_ms = 2;
        config.ship.retry_max_ms = 40;
        config.scan.contexts = 2;
        config.placement.vnodes_per_target = VNODES;
        config.net.rpc_timeout_ms = 10;
        let config = Arc::new(config);

        let pool_map = SharedPoolMap::new(PoolMap::new(
            1,
            (0..n).map(|i| (rank(i), TargetState::Up)),
        ));
        let peers = Arc::new(StdRwLock::new(HashMap::new()));
        let down = Arc::new(RwLock::new(HashSet::new()));
        let transport: Arc<dyn Transport> = Arc::new(ClusterTransport {
            peers: peers.clone(),
            down: down.clone(),
            timeout: config.rpc_timeout(),
        });

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let oracle = Arc::new(RingOracle::new(VNODES));
            let source = Arc::new(MemoryObjectSource::new(4));
            let events = EventBus::new();
            let faults = FaultInjector::new();
            let registry = Arc::new(RebuildRegistry::new(RebuildDeps {
                self_rank: rank(i),
                config: config.clone(),
                oracle: oracle.clone(),
                source: source.clone(),
                transport: transport.clone(),
                events: events.clone(),
                faults: faults.clone(),
            }));
            registry.register_pool(pool(), Arc::new(pool_map.clone()));

            let sink = Arc::new(RecordingSink::default());
            peers.write().unwrap().insert(
                rank(i),
                Peer {
                    registry: Arc::downgrade(&registry),
                    sink: sink.clone(),
                },
            );
            nodes.push(Node {
                rank: rank(i),
                registry,
                source,
                sink,
                oracle,
                events,
                faults,
            });
        }

        Self {
            nodes,
            pool_map,
            transport,
            down,
            holdings: vec![Vec::new(); n],
        }
    }

    pub fn node(&self, i: usize) -> &Node {
        &self.nodes[i]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn pool_map(&self) -> Arc<PoolMap> {
        self.pool_map.current()
    }

    /// Store `count` three-shard objects, each shard on the target its
    /// layout names.
    pub fn populate(&mut self, count: u64) {
        let placement = PlacementMap::build(&self.pool_map(), VNODES);
        for seq in 0..count {
            let oid = ObjectId::with_shards(3, seq);
            let container = ContainerId::from(0xc000_u128 + (seq % 4) as u128);
            for (shard, target) in placement.layout(&oid).into_iter().enumerate() {
                let object = LocalObject::new(container, oid, shard as u32);
                let i = target.rank() as usize;
                self.nodes[i].source.extend(pool(), [object]);
                self.holdings[i].push(object);
            }
        }
    }

    /// Take node `i` off the network and mark it down in the pool map.
    pub async fn kill_node(&self, i: usize) {
        self.partition(i).await;
        self.pool_map.set_target_state(rank(i), TargetState::Down);
    }

    /// Take node `i` off the network without touching the pool map.
    pub async fn partition(&self, i: usize) {
        self.down.write().await.insert(rank(i));
    }

    /// Mark node `i` down in the pool map.
    pub fn mark_down(&self, i: usize) {
        self.pool_map.set_target_state(rank(i), TargetState::Down);
    }

    /// Build a term-1 scan request for `failed` against the current pool map.
    pub fn request(
        &self,
        master: usize,
        failed: &[usize],
        rebuild_version: RebuildVersion,
    ) -> ScanRequest {
        ScanRequest {
            pool_id: pool(),
            pool_map_version: self.pool_map().version(),
            rebuild_version,
            leader_term: 1,
            master_rank: rank(master),
            failed_targets: failed.iter().map(|&i| rank(i)).collect(),
        }
    }

    /// Ranks a leader sends the trigger to: every target not in `failed`.
    pub fn scan_targets(&self, failed: &[usize]) -> Vec<TargetId> {
        (0..self.len())
            .filter(|i| !failed.contains(i))
            .map(rank)
            .collect()
    }

    /// Send `request` to every surviving target, as the pool leader does.
    pub async fn trigger(&self, request: &ScanRequest) -> ScanReply {
        let failed: Vec<usize> = request
            .failed_targets
            .iter()
            .map(|t| t.rank() as usize)
            .collect();
        trigger_scan(self.transport.clone(), &self.scan_targets(&failed), request).await
    }

    /// Trackers for `rebuild_version` on every node that started a scan.
    pub fn trackers(
        &self,
        rebuild_version: RebuildVersion,
    ) -> Vec<(usize, Arc<RebuildTracker>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| {
                node.registry
                    .tracker(pool(), rebuild_version)
                    .map(|tracker| (i, tracker))
            })
            .collect()
    }

    /// Wait until every started scan for `rebuild_version` has torn down.
    pub async fn wait_scans(&self, rebuild_version: RebuildVersion) {
        for (i, tracker) in self.trackers(rebuild_version) {
            tokio::time::timeout(Duration::from_secs(10), tracker.wait_scan_done())
                .await
                .unwrap_or_else(|_| panic!("scan on node {i} did not finish"));
        }
    }

    /// Every fact delivered to any node.
    pub fn delivered(&self) -> BTreeSet<FactKey> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.sink.received().into_iter().flat_map(move |request| {
                    request
                        .entries()
                        .map(|(oid, container, shard)| {
                            (node.rank, container, ShardKey::new(oid, shard))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect()
    }

    /// Facts a correct rebuild of `failed` ships when `scanners` scan.
    pub fn expected(&self, scanners: &[usize], failed: &[usize]) -> BTreeSet<FactKey> {
        let placement = PlacementMap::build(&self.pool_map(), VNODES);
        let group = FailedTargetGroup::new(0, failed.iter().map(|&i| rank(i)).collect());
        let mut facts = BTreeSet::new();
        for &i in scanners {
            for object in &self.holdings[i] {
                if let RebuildDecision::Rebuild { target, shard } =
                    placement.find_rebuild(&object.oid, &group)
                    && target != rank(i)
                {
                    facts.insert((target, object.container, ShardKey::new(object.oid, shard)));
                }
            }
        }
        facts
    }
}
