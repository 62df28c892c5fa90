//! Error types for network operations.

use std::time::Duration;

use scour_types::TargetId;

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to connect to a remote endpoint.
    #[error("connection error: {0}")]
    Connect(String),

    /// A QUIC connection error.
    #[error("connection error: {0}")]
    Connection(#[from] iroh::endpoint::ConnectionError),

    /// Failed to open a stream.
    #[error("stream open error: {0}")]
    StreamOpen(String),

    /// Error writing to a stream.
    #[error("write error: {0}")]
    Write(#[from] iroh::endpoint::WriteError),

    /// Stream was already closed when trying to finish.
    #[error("stream closed: {0}")]
    ClosedStream(#[from] iroh::endpoint::ClosedStream),

    /// Error reading from a stream.
    #[error("read error: {0}")]
    ReadToEnd(#[from] iroh::endpoint::ReadToEndError),

    /// Error reading exact bytes.
    #[error("read exact error: {0}")]
    ReadExact(#[from] iroh::endpoint::ReadExactError),

    /// The RPC did not complete within the configured timeout.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No address is known for the target.
    #[error("no address for target {0}")]
    UnknownTarget(TargetId),

    /// The request is malformed and was not sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote answered with the wrong message type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The local endpoint could not be created.
    #[error("endpoint error: {0}")]
    Endpoint(String),
}

impl NetError {
    /// Whether the failure is a timeout or a connection-level problem
    /// that may clear up by sending again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::Connection(_)
                | Self::StreamOpen(_)
                | Self::Write(_)
                | Self::ClosedStream(_)
                | Self::ReadToEnd(_)
                | Self::ReadExact(_)
                | Self::Timeout(_)
        )
    }
}
