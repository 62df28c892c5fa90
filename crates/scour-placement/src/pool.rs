//! Read access to the current pool map.

use std::sync::Arc;

use scour_types::{MapVersion, PoolMap, TargetId, TargetState};
use tokio::sync::watch;
use tracing::debug;

/// Source of the latest pool map for one pool.
///
/// Maintenance of the map lives elsewhere; rebuild only reads it and
/// waits for it to change.
pub trait PoolMapSource: Send + Sync {
    /// The latest pool map.
    fn current(&self) -> Arc<PoolMap>;

    /// A receiver that is notified whenever a newer map is published.
    fn subscribe(&self) -> watch::Receiver<Arc<PoolMap>>;
}

/// A [`PoolMapSource`] backed by a `tokio::sync::watch` channel.
///
/// Cheap to clone; all clones publish to the same channel.
#[derive(Debug, Clone)]
pub struct SharedPoolMap {
    tx: Arc<watch::Sender<Arc<PoolMap>>>,
}

impl SharedPoolMap {
    /// Create a source holding `map`.
    pub fn new(map: PoolMap) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(map));
        Self { tx: Arc::new(tx) }
    }

    /// Publish `map` if it is newer than the current one.
    pub fn publish(&self, map: PoolMap) -> bool {
        let version = map.version();
        let map = Arc::new(map);
        let published = self.tx.send_if_modified(|current| {
            if map.version() > current.version() {
                *current = map.clone();
                true
            } else {
                false
            }
        });
        if published {
            debug!(version, "pool map published");
        }
        published
    }

    /// Publish a copy of the current map with `target` set to `state`.
    ///
    /// Returns the new map version.
    pub fn set_target_state(&self, target: TargetId, state: TargetState) -> MapVersion {
        let mut version = 0;
        self.tx.send_modify(|current| {
            let next = current.with_target_state(target, state);
            version = next.version();
            *current = Arc::new(next);
        });
        debug!(%target, ?state, version, "target state changed");
        version
    }
}

impl PoolMapSource for SharedPoolMap {
    fn current(&self) -> Arc<PoolMap> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Arc<PoolMap>> {
        self.tx.subscribe()
    }
}
