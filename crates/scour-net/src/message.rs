//! Protocol messages for the rebuild RPCs.
//!
//! All messages are serialized with postcard and framed with a 4-byte
//! big-endian length prefix.

use serde::{Deserialize, Serialize};
use scour_types::{
    ContainerId, MapVersion, ObjectId, PoolId, RebuildFact, RebuildVersion, TargetId,
};

use crate::NetError;

/// Maximum number of object descriptors in one [`ObjectsRequest`].
pub const MAX_OBJECTS_PER_REQUEST: usize = 512;

/// Maximum encoded message size: 16 MiB.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length of the frame prefix.
const FRAME_PREFIX_LEN: usize = 4;

/// Outcome reported by the remote side of an RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    /// Request handled.
    Ok,
    /// Remote is busy; send the same request again later.
    Again,
    /// Request failed on the remote.
    Failed {
        /// Numeric error code.
        code: i32,
        /// Human-readable cause.
        reason: String,
    },
}

impl ReplyStatus {
    /// Build a failed status.
    pub fn failed(code: i32, reason: impl Into<String>) -> Self {
        Self::Failed {
            code,
            reason: reason.into(),
        }
    }

    /// Whether the status reports success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Whether the remote asked to retry.
    pub fn is_again(&self) -> bool {
        matches!(self, Self::Again)
    }
}

/// Ask a target to start scanning for a rebuild version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Pool map version the rebuild was computed against.
    pub pool_map_version: MapVersion,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Term of the pool service leader that sent the request.
    pub leader_term: u64,
    /// Rank of the pool service leader.
    pub master_rank: TargetId,
    /// Targets whose failure triggered this rebuild.
    pub failed_targets: Vec<TargetId>,
}

/// Reply to a [`ScanRequest`], possibly aggregated from many targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReply {
    /// Overall status.
    pub status: ReplyStatus,
    /// Targets that failed to start scanning.
    pub failed_ranks: Option<Vec<TargetId>>,
}

impl ScanReply {
    /// A successful reply with no failed ranks.
    pub fn ok() -> Self {
        Self {
            status: ReplyStatus::Ok,
            failed_ranks: None,
        }
    }

    /// A failed reply naming `rank` as the target that could not start.
    pub fn failed(status: ReplyStatus, rank: TargetId) -> Self {
        Self {
            status,
            failed_ranks: Some(vec![rank]),
        }
    }

    /// Fold `other` into this reply.
    ///
    /// Failed ranks are appended without dedup; the first non-success
    /// status wins.
    pub fn merge(&mut self, other: ScanReply) {
        if self.status.is_ok() && !other.status.is_ok() {
            self.status = other.status;
        }
        if let Some(ranks) = other.failed_ranks {
            self.failed_ranks.get_or_insert_with(Vec::new).extend(ranks);
        }
    }
}

/// A batch of object descriptors for one destination target.
///
/// The three arrays are parallel: entry `i` describes shard
/// `shard_numbers[i]` of `object_ids[i]` in container `container_ids[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectsRequest {
    /// Pool being rebuilt.
    pub pool_id: PoolId,
    /// Rebuild episode.
    pub rebuild_version: RebuildVersion,
    /// Rank of the sending target.
    pub sender_rank: TargetId,
    /// Objects to rebuild.
    pub object_ids: Vec<ObjectId>,
    /// Container of each object.
    pub container_ids: Vec<ContainerId>,
    /// Shard of each object to rebuild.
    pub shard_numbers: Vec<u32>,
}

impl ObjectsRequest {
    /// Build a request from drained facts.
    pub fn from_facts(
        pool_id: PoolId,
        rebuild_version: RebuildVersion,
        sender_rank: TargetId,
        facts: &[RebuildFact],
    ) -> Self {
        Self {
            pool_id,
            rebuild_version,
            sender_rank,
            object_ids: facts.iter().map(|f| f.object_id).collect(),
            container_ids: facts.iter().map(|f| f.container_id).collect(),
            shard_numbers: facts.iter().map(|f| f.shard_number).collect(),
        }
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.object_ids.len()
    }

    /// Whether the request carries no descriptors.
    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }

    /// Check the parallel arrays line up and respect the batch limit.
    pub fn validate(&self) -> Result<(), NetError> {
        let len = self.object_ids.len();
        if self.container_ids.len() != len || self.shard_numbers.len() != len {
            return Err(NetError::InvalidRequest(format!(
                "array lengths differ: {} objects, {} containers, {} shards",
                len,
                self.container_ids.len(),
                self.shard_numbers.len()
            )));
        }
        if len > MAX_OBJECTS_PER_REQUEST {
            return Err(NetError::InvalidRequest(format!(
                "{len} objects exceeds limit of {MAX_OBJECTS_PER_REQUEST}"
            )));
        }
        Ok(())
    }

    /// Iterate over `(object, container, shard)` triples.
    pub fn entries(&self) -> impl Iterator<Item = (ObjectId, ContainerId, u32)> + '_ {
        self.object_ids
            .iter()
            .zip(&self.container_ids)
            .zip(&self.shard_numbers)
            .map(|((oid, container), shard)| (*oid, *container, *shard))
    }
}

/// Reply to an [`ObjectsRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectsReply {
    /// Whether the destination accepted the batch.
    pub status: ReplyStatus,
}

/// Messages exchanged between targets during rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildMessage {
    /// Start scanning (leader to target).
    ScanRequest(ScanRequest),
    /// Response to [`RebuildMessage::ScanRequest`].
    ScanReply(ScanReply),
    /// Objects to rebuild (scanning target to destination).
    ObjectsRequest(ObjectsRequest),
    /// Response to [`RebuildMessage::ObjectsRequest`].
    ObjectsReply(ObjectsReply),
}

/// Encode a message as a length-prefixed frame.
pub fn encode_frame(message: &RebuildMessage) -> Result<Vec<u8>, NetError> {
    let payload =
        postcard::to_allocvec(message).map_err(|e| NetError::Serialization(e.to_string()))?;
    check_frame_len(payload.len())?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode one complete length-prefixed frame.
pub fn decode_frame(frame: &[u8]) -> Result<RebuildMessage, NetError> {
    let Some((prefix, payload)) = frame.split_first_chunk::<FRAME_PREFIX_LEN>() else {
        return Err(NetError::Serialization(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    };
    let len = u32::from_be_bytes(*prefix) as usize;
    check_frame_len(len)?;
    if payload.len() != len {
        return Err(NetError::Serialization(format!(
            "frame length mismatch: prefix says {len}, got {}",
            payload.len()
        )));
    }
    decode_payload(payload)
}

pub(crate) fn check_frame_len(len: usize) -> Result<(), NetError> {
    if len > MAX_FRAME_SIZE {
        return Err(NetError::Serialization(format!(
            "message too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }
    Ok(())
}

pub(crate) fn decode_payload(payload: &[u8]) -> Result<RebuildMessage, NetError> {
    postcard::from_bytes(payload).map_err(|e| NetError::Serialization(e.to_string()))
}
