//! Network transport built on iroh QUIC.
//!
//! [`QuicTransport`] wraps an iroh [`Endpoint`] and provides:
//! - Connection pooling (reuse connections to the same peer).
//! - Request/response over bi-directional streams with length-prefixed
//!   postcard frames.
//! - A per-RPC timeout surfaced as [`NetError::Timeout`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use iroh::endpoint::{Connection, RecvStream, SendStream};
use iroh::{Endpoint, EndpointAddr, SecretKey};
use scour_types::TargetId;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::message::{
    ObjectsReply, ObjectsRequest, RebuildMessage, ScanReply, ScanRequest, check_frame_len,
    decode_payload, encode_frame,
};
use crate::{AddressBook, REBUILD_ALPN};

/// Default per-RPC timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Network transport for rebuild RPCs.
pub struct QuicTransport {
    endpoint: Endpoint,
    /// Cached connections to remote peers, keyed by their iroh endpoint ID.
    ///
    /// A `Mutex` (not `RwLock`) so concurrent callers never open two
    /// connections to the same peer.
    connections: Arc<Mutex<HashMap<iroh::EndpointId, Connection>>>,
    addresses: AddressBook,
    rpc_timeout: Duration,
    alpn: Vec<u8>,
}

impl QuicTransport {
    /// Bind a new endpoint speaking [`REBUILD_ALPN`].
    ///
    /// Use [`iroh::RelayMode::Disabled`] for tests that don't need relay servers.
    pub async fn bind(
        secret_key: SecretKey,
        relay_mode: iroh::RelayMode,
        addresses: AddressBook,
        rpc_timeout: Duration,
    ) -> Result<Self, NetError> {
        let alpn = REBUILD_ALPN.to_vec();
        let endpoint = Endpoint::builder()
            .secret_key(secret_key)
            .alpns(vec![alpn.clone()])
            .relay_mode(relay_mode)
            .bind()
            .await
            .map_err(|e| NetError::Endpoint(e.to_string()))?;

        Ok(Self::from_endpoint(endpoint, addresses, rpc_timeout))
    }

    /// Wrap an existing endpoint, for example one shared with an iroh
    /// [`Router`] that serves the inbound side.
    ///
    /// [`Router`]: iroh::protocol::Router
    pub fn from_endpoint(endpoint: Endpoint, addresses: AddressBook, rpc_timeout: Duration) -> Self {
        Self {
            endpoint,
            connections: Arc::new(Mutex::new(HashMap::new())),
            addresses,
            rpc_timeout,
            alpn: REBUILD_ALPN.to_vec(),
        }
    }

    /// Return a reference to the underlying iroh endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Return the [`EndpointAddr`] of this transport.
    pub fn addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    /// The rank to address table used for outgoing RPCs.
    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }

    // -------------------------------------------------------------------
    // Connection management
    // -------------------------------------------------------------------

    /// Get or establish a QUIC connection to a remote peer.
    async fn get_connection(&self, addr: EndpointAddr) -> Result<Connection, NetError> {
        let remote_id = addr.id;
        let mut cache = self.connections.lock().await;

        if let Some(conn) = cache.get(&remote_id)
            && conn.close_reason().is_none()
        {
            return Ok(conn.clone());
        }

        debug!(remote = %remote_id.fmt_short(), "connecting to peer");
        let conn = self
            .endpoint
            .connect(addr, &self.alpn)
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;

        cache.insert(remote_id, conn.clone());
        Ok(conn)
    }

    /// Remove a cached connection.
    pub async fn remove_connection(&self, id: &iroh::EndpointId) {
        self.connections.lock().await.remove(id);
    }

    // -------------------------------------------------------------------
    // Request/response
    // -------------------------------------------------------------------

    /// Send `message` to `target` and wait for its reply.
    async fn request(
        &self,
        target: TargetId,
        message: &RebuildMessage,
    ) -> Result<RebuildMessage, NetError> {
        let addr = self
            .addresses
            .get(target)
            .ok_or(NetError::UnknownTarget(target))?;
        let remote_id = addr.id;

        match tokio::time::timeout(self.rpc_timeout, self.roundtrip(addr, message)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                if e.is_transient() {
                    self.remove_connection(&remote_id).await;
                }
                Err(e)
            }
            Err(_) => {
                warn!(%target, timeout = ?self.rpc_timeout, "rpc timed out");
                self.remove_connection(&remote_id).await;
                Err(NetError::Timeout(self.rpc_timeout))
            }
        }
    }

    async fn roundtrip(
        &self,
        addr: EndpointAddr,
        message: &RebuildMessage,
    ) -> Result<RebuildMessage, NetError> {
        let conn = self.get_connection(addr).await?;
        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| NetError::StreamOpen(e.to_string()))?;

        Self::send_on_stream(&mut send, message).await?;
        Self::recv_message(&mut recv).await
    }

    // -------------------------------------------------------------------
    // Low-level message send/receive
    // -------------------------------------------------------------------

    /// Send a message on an open send stream and finish it.
    pub async fn send_on_stream(
        send: &mut SendStream,
        message: &RebuildMessage,
    ) -> Result<(), NetError> {
        let frame = encode_frame(message)?;
        send.write_all(&frame).await?;
        send.finish()?;
        Ok(())
    }

    /// Receive one length-prefixed message from a stream.
    pub async fn recv_message(recv: &mut RecvStream) -> Result<RebuildMessage, NetError> {
        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        check_frame_len(len)?;

        let payload = recv.read_to_end(len).await?;
        decode_payload(&payload)
    }

    /// Serve request/response bi-streams on an inbound connection.
    ///
    /// For each stream the handler's reply, if any, is sent back on the same
    /// stream. Runs until the connection is closed.
    pub async fn handle_bi_streams<F, Fut>(conn: Connection, handler: F)
    where
        F: Fn(RebuildMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<RebuildMessage>> + Send,
    {
        loop {
            match conn.accept_bi().await {
                Ok((mut send, mut recv)) => match Self::recv_message(&mut recv).await {
                    Ok(request) => {
                        if let Some(response) = handler(request).await
                            && let Err(e) = Self::send_on_stream(&mut send, &response).await
                        {
                            warn!("failed to send response: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("failed to decode bi-stream request: {e}");
                    }
                },
                Err(e) => {
                    debug!("connection closed (bi): {e}");
                    break;
                }
            }
        }
    }

    /// Gracefully close the transport.
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

#[async_trait::async_trait]
impl crate::Transport for QuicTransport {
    async fn send_objects(
        &self,
        target: TargetId,
        request: &ObjectsRequest,
    ) -> Result<ObjectsReply, NetError> {
        request.validate()?;
        match self
            .request(target, &RebuildMessage::ObjectsRequest(request.clone()))
            .await?
        {
            RebuildMessage::ObjectsReply(reply) => Ok(reply),
            other => Err(NetError::UnexpectedResponse(format!(
                "expected ObjectsReply, got: {other:?}"
            ))),
        }
    }

    async fn send_scan(
        &self,
        target: TargetId,
        request: &ScanRequest,
    ) -> Result<ScanReply, NetError> {
        match self
            .request(target, &RebuildMessage::ScanRequest(request.clone()))
            .await?
        {
            RebuildMessage::ScanReply(reply) => Ok(reply),
            other => Err(NetError::UnexpectedResponse(format!(
                "expected ScanReply, got: {other:?}"
            ))),
        }
    }
}
