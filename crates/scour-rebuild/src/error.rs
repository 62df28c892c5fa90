//! Error types for rebuild operations.

use scour_net::ReplyStatus;
use scour_types::{PoolId, TargetId};

use crate::fault::FailPoint;

/// Status code for an invalid request or an injected start failure.
pub const ERR_INVALID: i32 = -22;
/// Status code for a missing pool or target.
pub const ERR_NONEXISTENT: i32 = -2;
/// Status code for a cancelled rebuild.
pub const ERR_CANCELED: i32 = -125;
/// Status code for a network failure.
pub const ERR_NETWORK: i32 = -5;
/// Status code for anything else.
pub const ERR_INTERNAL: i32 = -1;

/// Errors that can occur during a rebuild scan.
#[derive(Debug, thiserror::Error)]
pub enum RebuildError {
    /// The ship queue's index is inconsistent.
    #[error("index error: {0}")]
    Index(#[from] scour_index::IndexError),

    /// Placement evaluation failed.
    #[error("placement error: {0}")]
    Placement(#[from] scour_placement::PlacementError),

    /// A batch could not be sent.
    #[error("network error: {0}")]
    Net(#[from] scour_net::NetError),

    /// The destination rejected a batch.
    #[error("target {target} rejected batch: {status:?}")]
    Remote {
        /// Destination that answered.
        target: TargetId,
        /// Status it answered with.
        status: ReplyStatus,
    },

    /// A failed target named in the scan request is not in the pool map.
    #[error("failed target {0} is not in the pool map")]
    TargetNotInPoolMap(TargetId),

    /// No pool map is registered for the pool.
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),

    /// The scan request is malformed.
    #[error("invalid scan request: {0}")]
    InvalidRequest(String),

    /// Local object enumeration failed.
    #[error("object source error: {0}")]
    Source(String),

    /// A scanner task panicked or was cancelled.
    #[error("scanner task failed: {0}")]
    TaskFailed(String),

    /// Scanner tasks still hold the ship queue after the collective joined.
    #[error("ship queue still shared after scan")]
    QueueBusy,

    /// The rebuild was aborted.
    #[error("rebuild aborted")]
    Aborted,

    /// An armed fail point fired.
    #[error("fail point {0:?} triggered")]
    FailPoint(FailPoint),
}

impl RebuildError {
    /// Numeric status code reported in failed replies.
    pub fn code(&self) -> i32 {
        match self {
            Self::TargetNotInPoolMap(_) | Self::UnknownPool(_) => ERR_NONEXISTENT,
            Self::InvalidRequest(_) | Self::FailPoint(_) => ERR_INVALID,
            Self::Aborted => ERR_CANCELED,
            Self::Net(_) => ERR_NETWORK,
            Self::Remote {
                status: ReplyStatus::Failed { code, .. },
                ..
            } => *code,
            _ => ERR_INTERNAL,
        }
    }
}
