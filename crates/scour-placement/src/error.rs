//! Error types for placement lookups.

use scour_types::{MapVersion, PoolId};

/// Errors returned by [`PlacementOracle`](crate::PlacementOracle) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// The cached placement view is older than the pool map the caller holds.
    ///
    /// Not a failure: refresh the view and ask again.
    #[error("placement view is stale: cached v{cached}, required v{required}")]
    Stale {
        /// Version of the cached view.
        cached: MapVersion,
        /// Version the caller evaluated against.
        required: MapVersion,
    },

    /// No placement view has been built for this pool.
    #[error("no placement map for pool {0}")]
    NoPlacementMap(PoolId),

    /// Building a placement view failed.
    #[error("placement refresh failed: {0}")]
    RefreshFailed(String),
}

impl PlacementError {
    /// Whether the caller should refresh and retry.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}
