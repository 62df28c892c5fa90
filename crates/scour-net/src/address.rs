//! Target rank to iroh address resolution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use iroh::EndpointAddr;
use scour_types::TargetId;

/// Maps target ranks to the iroh address serving them.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    addrs: Arc<RwLock<HashMap<TargetId, EndpointAddr>>>,
}

impl AddressBook {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the address of `target`, replacing any previous one.
    pub fn insert(&self, target: TargetId, addr: EndpointAddr) {
        self.addrs
            .write()
            .expect("address book lock poisoned")
            .insert(target, addr);
    }

    /// Forget `target`.
    pub fn remove(&self, target: TargetId) -> Option<EndpointAddr> {
        self.addrs
            .write()
            .expect("address book lock poisoned")
            .remove(&target)
    }

    /// Address of `target`.
    pub fn get(&self, target: TargetId) -> Option<EndpointAddr> {
        self.addrs
            .read()
            .expect("address book lock poisoned")
            .get(&target)
            .cloned()
    }

    /// Number of known targets.
    pub fn len(&self) -> usize {
        self.addrs.read().expect("address book lock poisoned").len()
    }

    /// Whether no target is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
