//! Local object enumeration.
//!
//! The scanner does not know how objects are stored. It asks an
//! [`ObjectSource`] for the objects held by each local execution context.

use std::collections::HashMap;
use std::sync::RwLock;

use scour_types::{ContainerId, ObjectId, PoolId};

use crate::error::RebuildError;

/// One locally held object shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalObject {
    /// Container the object lives in.
    pub container: ContainerId,
    /// The object.
    pub oid: ObjectId,
    /// Shard of the object held locally.
    pub shard: u32,
}

impl LocalObject {
    /// Create a new local object descriptor.
    pub fn new(container: ContainerId, oid: ObjectId, shard: u32) -> Self {
        Self {
            container,
            oid,
            shard,
        }
    }
}

/// Enumerates locally held objects, partitioned by execution context.
#[async_trait::async_trait]
pub trait ObjectSource: Send + Sync {
    /// Number of local execution contexts. One scanner runs per context.
    fn contexts(&self) -> usize;

    /// Every object of `pool` held by `context`.
    async fn list_objects(
        &self,
        pool: PoolId,
        context: usize,
    ) -> Result<Vec<LocalObject>, RebuildError>;
}

/// In-memory [`ObjectSource`].
#[derive(Debug)]
pub struct MemoryObjectSource {
    contexts: usize,
    objects: RwLock<HashMap<(PoolId, usize), Vec<LocalObject>>>,
}

impl MemoryObjectSource {
    /// Create an empty source with `contexts` execution contexts (at least 1).
    pub fn new(contexts: usize) -> Self {
        Self {
            contexts: contexts.max(1),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Record `object` as held by `context`.
    pub fn add(&self, pool: PoolId, context: usize, object: LocalObject) {
        self.objects
            .write()
            .expect("object source lock poisoned")
            .entry((pool, context % self.contexts))
            .or_default()
            .push(object);
    }

    /// Spread `objects` across contexts round-robin.
    pub fn extend(&self, pool: PoolId, objects: impl IntoIterator<Item = LocalObject>) {
        let mut map = self.objects.write().expect("object source lock poisoned");
        for (i, object) in objects.into_iter().enumerate() {
            map.entry((pool, i % self.contexts))
                .or_default()
                .push(object);
        }
    }

    /// Total number of objects held for `pool`.
    pub fn len(&self, pool: PoolId) -> usize {
        self.objects
            .read()
            .expect("object source lock poisoned")
            .iter()
            .filter(|((p, _), _)| *p == pool)
            .map(|(_, objects)| objects.len())
            .sum()
    }
}

#[async_trait::async_trait]
impl ObjectSource for MemoryObjectSource {
    fn contexts(&self) -> usize {
        self.contexts
    }

    async fn list_objects(
        &self,
        pool: PoolId,
        context: usize,
    ) -> Result<Vec<LocalObject>, RebuildError> {
        if context >= self.contexts {
            return Err(RebuildError::Source(format!(
                "context {context} out of range (have {})",
                self.contexts
            )));
        }
        Ok(self
            .objects
            .read()
            .expect("object source lock poisoned")
            .get(&(pool, context))
            .cloned()
            .unwrap_or_default())
    }
}
