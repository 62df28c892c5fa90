//! Type-safe event bus for intra-node pub/sub.
//!
//! The [`EventBus`] lets the rebuild pipeline publish progress without
//! knowing who listens. Each event type is a distinct struct implementing the
//! [`Event`] marker trait and gets its own `tokio::sync::broadcast` channel,
//! created lazily on the first `subscribe()`.
//!
//! # Example
//!
//! ```rust
//! use scour_types::events::{EventBus, ScanStarted};
//! use scour_types::PoolId;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<ScanStarted>();
//!
//! let pool_id = PoolId::from(7u128);
//! bus.emit(ScanStarted {
//!     pool_id,
//!     rebuild_version: 1,
//!     leader_term: 1,
//! });
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.pool_id, pool_id);
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{PoolId, RebuildVersion, TargetId};

// ---------------------------------------------------------------------------
// Event trait
// ---------------------------------------------------------------------------

/// Marker trait for all events that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A scan leader has started for a rebuild version.
#[derive(Clone, Debug)]
pub struct ScanStarted {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Term of the leader that triggered the scan.
    pub leader_term: u64,
}
impl Event for ScanStarted {}

/// A scan finished and every queued fact was shipped or abandoned.
#[derive(Clone, Debug)]
pub struct ScanCompleted {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Objects evaluated by all scanner contexts.
    pub objects_scanned: u64,
    /// Facts inserted into the ship queue.
    pub facts_queued: u64,
    /// Facts delivered to their destinations.
    pub facts_shipped: u64,
}
impl Event for ScanCompleted {}

/// A scan stopped on a fatal error or an explicit abort.
#[derive(Clone, Debug)]
pub struct ScanAborted {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Human-readable cause.
    pub reason: String,
}
impl Event for ScanAborted {}

/// Scan resources (ship queue, failed-rank list, target group) were released.
///
/// Emitted exactly once per scan leader, whatever state it ended in.
#[derive(Clone, Debug)]
pub struct ScanTeardown {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Name of the state the leader was in when resources were released.
    pub state: &'static str,
    /// Facts still queued at release time.
    pub leftover_facts: usize,
}
impl Event for ScanTeardown {}

/// One batch of object descriptors was accepted by a destination.
#[derive(Clone, Debug)]
pub struct BatchShipped {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Destination target.
    pub target: TargetId,
    /// Number of facts in the batch.
    pub count: usize,
}
impl Event for BatchShipped {}

/// Shipment to a target was abandoned because the target left the pool map.
#[derive(Clone, Debug)]
pub struct ShipmentAbandoned {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Destination that went away.
    pub target: TargetId,
    /// Facts dropped, including the in-flight batch.
    pub dropped: usize,
}
impl Event for ShipmentAbandoned {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Each entry maps a `TypeId` to a type-erased `broadcast::Sender<E>`.
struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A type-safe event bus for intra-node communication.
///
/// Clonable (`Arc` inside). Thread-safe. Non-blocking emits.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// If nobody subscribed to `E` the event is dropped.
    pub fn emit<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(sender) = inner
            .channels
            .get(&type_id)
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            // No active receivers is fine.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let type_id = TypeId::of::<E>();
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        let sender = inner
            .channels
            .entry(type_id)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            })
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("type mismatch in event bus");

        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for a specific event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are
    /// skipped with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
