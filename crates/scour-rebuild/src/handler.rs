//! Inbound rebuild RPCs.
//!
//! [`RebuildProtocol`] implements iroh's [`ProtocolHandler`] and is
//! registered with a [`Router`] under [`REBUILD_ALPN`].
//!
//! [`ProtocolHandler`]: iroh::protocol::ProtocolHandler
//! [`Router`]: iroh::protocol::Router
//! [`REBUILD_ALPN`]: scour_net::REBUILD_ALPN

use std::fmt;
use std::sync::Arc;

use iroh::endpoint::Connection;
use iroh::protocol::AcceptError;
use scour_net::{ObjectsReply, ObjectsRequest, QuicTransport, RebuildMessage, ReplyStatus};
use tracing::{debug, warn};

use crate::error::ERR_INVALID;
use crate::registry::RebuildRegistry;

/// Receiving end of object shipments: schedules the pulls that rebuild the
/// listed shards locally.
#[async_trait::async_trait]
pub trait ObjectsSink: Send + Sync {
    /// Accept a validated batch.
    async fn receive(&self, request: ObjectsRequest) -> ReplyStatus;
}

/// Answer one inbound message.
///
/// Scan requests go to `registry`, validated object batches to `sink`.
/// Replies are not expected to arrive here and get no answer.
pub async fn dispatch(
    registry: &RebuildRegistry,
    sink: &dyn ObjectsSink,
    message: RebuildMessage,
) -> Option<RebuildMessage> {
    match message {
        RebuildMessage::ScanRequest(request) => {
            Some(RebuildMessage::ScanReply(registry.handle_scan(&request)))
        }
        RebuildMessage::ObjectsRequest(request) => {
            let status = match request.validate() {
                Ok(()) => {
                    debug!(
                        pool = %request.pool_id,
                        version = request.rebuild_version,
                        from = %request.sender_rank,
                        count = request.len(),
                        "objects received"
                    );
                    sink.receive(request).await
                }
                Err(e) => {
                    warn!(from = %request.sender_rank, error = %e, "rejecting objects request");
                    ReplyStatus::failed(ERR_INVALID, e.to_string())
                }
            };
            Some(RebuildMessage::ObjectsReply(ObjectsReply { status }))
        }
        other => {
            debug!("unexpected rebuild message: {other:?}");
            None
        }
    }
}

/// Serves rebuild RPCs from other targets.
pub struct RebuildProtocol {
    registry: Arc<RebuildRegistry>,
    sink: Arc<dyn ObjectsSink>,
}

impl fmt::Debug for RebuildProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildProtocol").finish_non_exhaustive()
    }
}

impl RebuildProtocol {
    /// Create a protocol handler.
    pub fn new(registry: Arc<RebuildRegistry>, sink: Arc<dyn ObjectsSink>) -> Self {
        Self { registry, sink }
    }
}

impl iroh::protocol::ProtocolHandler for RebuildProtocol {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        debug!(remote = %conn.remote_id().fmt_short(), "rebuild connection accepted");

        let registry = self.registry.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            QuicTransport::handle_bi_streams(conn, move |message| {
                let registry = registry.clone();
                let sink = sink.clone();
                async move { dispatch(&registry, sink.as_ref(), message).await }
            })
            .await;
        });
        Ok(())
    }
}
