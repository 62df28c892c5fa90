//! Rebuild RPCs on iroh QUIC.
//!
//! This crate implements the network side of the rebuild pipeline:
//!
//! - [`RebuildMessage`]: the wire protocol (postcard-serialized,
//!   length-prefixed frames).
//! - [`Transport`]: the seam the pipeline sends through, so tests can
//!   substitute a mock.
//! - [`QuicTransport`]: an iroh [`Endpoint`] with connection pooling and a
//!   per-RPC timeout.
//! - [`NetError::is_transient`]: the transient versus fatal classification
//!   the shipper's retry policy relies on.
//!
//! [`Endpoint`]: iroh::Endpoint

mod address;
mod error;
mod message;
mod transport;

pub use address::AddressBook;
pub use error::NetError;
pub use message::{
    MAX_FRAME_SIZE, MAX_OBJECTS_PER_REQUEST, ObjectsReply, ObjectsRequest, RebuildMessage,
    ReplyStatus, ScanReply, ScanRequest, decode_frame, encode_frame,
};
pub use transport::{DEFAULT_RPC_TIMEOUT, QuicTransport};

use scour_types::TargetId;

/// ALPN protocol identifier for rebuild RPCs.
pub const REBUILD_ALPN: &[u8] = b"scour/rebuild/0";

/// Trait abstracting the outgoing rebuild RPCs.
///
/// This allows substituting a mock transport in tests (avoiding the need
/// for real iroh QUIC endpoints and network access).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Ship a batch of object descriptors to `target`.
    async fn send_objects(
        &self,
        target: TargetId,
        request: &ObjectsRequest,
    ) -> Result<ObjectsReply, NetError>;

    /// Ask `target` to start scanning.
    async fn send_scan(&self, target: TargetId, request: &ScanRequest)
    -> Result<ScanReply, NetError>;
}
